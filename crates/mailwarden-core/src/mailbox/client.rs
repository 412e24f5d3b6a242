//! Mailbox access over IMAP.
//!
//! Every operation opens a fresh session (connect, login, examine) and
//! closes it before returning; a failed session is simply dropped. The
//! mailbox is only ever opened read-only and bodies are pulled with
//! BODY.PEEK, so polling leaves no trace in the account's seen state.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use mailwarden_imap::{
    Address, Authenticated, BodyStructure, Client, Envelope, Error as ImapError, FetchAttribute,
    FetchItem, ImapDate, ImapStream, Mailbox, SearchKey, Selected, SeqNum, SeqSet, Uid, UidSet,
    connect_plain, connect_tls,
};
use mailwarden_mime::encoding::{decode_header, decode_text, decode_transfer};
use tracing::{debug, warn};

use crate::account::{Credential, ImapEndpoint, Security};
use crate::mailbox::message::{
    ImageAttachment, MAX_BODY_CHARS, MAX_IMAGE_BYTES, MailboxProbe, RawMessage,
};
use crate::monitor::Checkpoint;

/// Applied to each protocol step, so a hung server always surfaces as
/// [`MailboxError::Timeout`] instead of stalling a monitor tick.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Octets of body text requested per message. Generous next to
/// [`MAX_BODY_CHARS`] to leave room for transfer-encoding overhead and
/// multi-byte characters.
const TEXT_FETCH_BYTES: u32 = 16 * 1024;

/// Errors from mailbox operations.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// An operation did not complete in time.
    #[error("mailbox operation timed out after {0:?}")]
    Timeout(Duration),

    /// The exchange failed or the server misbehaved.
    #[error("mailbox protocol error: {0}")]
    Protocol(String),

    /// The monitored mailbox does not exist on the server.
    #[error("mailbox not found: {0}")]
    NotFound(String),
}

impl MailboxError {
    /// Whether the owning monitor should stop instead of retrying on the
    /// next tick.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailure(_) | Self::NotFound(_))
    }
}

/// Read-only mailbox access used by monitors.
#[async_trait]
pub trait MailFetcher: Send + Sync {
    /// Verifies that the endpoint accepts the credential and reports the
    /// mailbox counters.
    ///
    /// # Errors
    ///
    /// Returns an error when the server is unreachable, hangs, or rejects
    /// the credential.
    async fn test_connection(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
    ) -> Result<MailboxProbe, MailboxError>;

    /// Returns messages above the checkpoint, oldest first, at most
    /// `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns an error when the session cannot be opened or a protocol
    /// step fails.
    async fn fetch_unseen(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
        checkpoint: &Checkpoint,
        limit: usize,
    ) -> Result<Vec<RawMessage>, MailboxError>;

    /// Returns the newest `limit` messages by sequence number, newest
    /// first, ignoring any checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the session cannot be opened or a protocol
    /// step fails.
    async fn fetch_recent(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<RawMessage>, MailboxError>;
}

type SelectedSession = Client<ImapStream, Selected>;
type Overview = Vec<(SeqNum, Vec<FetchItem>)>;

/// IMAP-backed [`MailFetcher`].
pub struct ImapMailboxClient {
    timeout: Duration,
    mailbox: Mailbox,
}

impl ImapMailboxClient {
    /// A client watching the inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mailbox(Mailbox::inbox())
    }

    /// A client watching the given folder.
    #[must_use]
    pub const fn with_mailbox(mailbox: Mailbox) -> Self {
        Self {
            timeout: STEP_TIMEOUT,
            mailbox,
        }
    }

    async fn timed<T>(
        &self,
        step: impl Future<Output = mailwarden_imap::Result<T>>,
    ) -> Result<T, MailboxError> {
        match tokio::time::timeout(self.timeout, step).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_imap(e)),
            Err(_) => Err(MailboxError::Timeout(self.timeout)),
        }
    }

    async fn open_authenticated(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
    ) -> Result<Client<ImapStream, Authenticated>, MailboxError> {
        let open = async {
            let stream = match endpoint.security {
                Security::Tls => connect_tls(&endpoint.host, endpoint.port).await?,
                Security::Plain => connect_plain(&endpoint.host, endpoint.port).await?,
            };
            let client = Client::from_stream(stream).await?;
            client.login(&endpoint.username, &credential.secret).await
        };
        self.timed(open).await
    }

    async fn open_session(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
    ) -> Result<(SelectedSession, mailwarden_imap::MailboxSnapshot), MailboxError> {
        let auth = self.open_authenticated(endpoint, credential).await?;
        match tokio::time::timeout(self.timeout, auth.examine(&self.mailbox)).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(ImapError::No(text))) => Err(MailboxError::NotFound(text)),
            Ok(Err(e)) => Err(map_imap(e)),
            Err(_) => Err(MailboxError::Timeout(self.timeout)),
        }
    }

    /// Pulls envelope and structure rows into [`RawMessage`]s, fetching
    /// each message's text and image sections along the way.
    async fn collect_messages(
        &self,
        session: &mut SelectedSession,
        overview: Overview,
    ) -> Result<Vec<RawMessage>, MailboxError> {
        let mut messages = Vec::with_capacity(overview.len());
        for (_seq, items) in overview {
            let mut uid = None;
            let mut envelope = None;
            let mut structure = None;
            for item in items {
                match item {
                    FetchItem::Uid(u) => uid = Some(u),
                    FetchItem::Envelope(e) => envelope = Some(*e),
                    FetchItem::BodyStructure(s) => structure = Some(s),
                    _ => {}
                }
            }
            let Some(uid) = uid else {
                continue;
            };
            let message = self
                .build_message(session, uid, envelope.unwrap_or_default(), structure)
                .await?;
            messages.push(message);
        }
        Ok(messages)
    }

    async fn build_message(
        &self,
        session: &mut SelectedSession,
        uid: Uid,
        envelope: Envelope,
        structure: Option<BodyStructure>,
    ) -> Result<RawMessage, MailboxError> {
        let plan = plan_sections(structure.as_ref());

        let body = match &plan.text {
            Some(section) => self.fetch_text(session, uid, section).await?,
            None => String::new(),
        };

        let mut images = Vec::with_capacity(plan.images.len());
        for section in &plan.images {
            if let Some(image) = self.fetch_image(session, uid, section).await? {
                images.push(image);
            }
        }

        Ok(RawMessage {
            uid: uid.get(),
            message_id: envelope
                .message_id
                .clone()
                .unwrap_or_else(|| format!("<uid-{}>", uid.get())),
            subject: envelope
                .subject
                .as_deref()
                .map(decode_header)
                .unwrap_or_default(),
            from: envelope.from.first().map(format_address).unwrap_or_default(),
            to: envelope.to.first().map(format_address).unwrap_or_default(),
            date: envelope.date.as_deref().and_then(parse_message_date),
            body,
            images,
        })
    }

    async fn fetch_text(
        &self,
        session: &mut SelectedSession,
        uid: Uid,
        plan: &SectionPlan,
    ) -> Result<String, MailboxError> {
        let attr = FetchAttribute::BodyPeek {
            section: Some(plan.section.clone()),
            partial: Some((0, TEXT_FETCH_BYTES)),
        };
        let responses = self
            .timed(session.uid_fetch(&UidSet::Single(uid), &[attr]))
            .await?;
        let Some(data) = first_body(responses) else {
            return Ok(String::new());
        };

        match decode_transfer(&plan.encoding, &data) {
            Ok(bytes) => Ok(bounded_text(
                &decode_text(&bytes, plan.charset.as_deref()),
                MAX_BODY_CHARS,
            )),
            Err(e) => {
                warn!(%uid, "undecodable body section {}: {e}", plan.section);
                Ok(String::new())
            }
        }
    }

    async fn fetch_image(
        &self,
        session: &mut SelectedSession,
        uid: Uid,
        plan: &SectionPlan,
    ) -> Result<Option<ImageAttachment>, MailboxError> {
        let attr = FetchAttribute::BodyPeek {
            section: Some(plan.section.clone()),
            partial: None,
        };
        let responses = self
            .timed(session.uid_fetch(&UidSet::Single(uid), &[attr]))
            .await?;
        let Some(data) = first_body(responses) else {
            return Ok(None);
        };

        match decode_transfer(&plan.encoding, &data) {
            Ok(bytes) => Ok(Some(ImageAttachment {
                filename: plan.filename.clone().unwrap_or_else(|| {
                    format!("part-{}.{}", plan.section, plan.subtype.to_lowercase())
                }),
                content_type: format!("image/{}", plan.subtype.to_lowercase()),
                data: bytes,
            })),
            Err(e) => {
                warn!(%uid, "undecodable image section {}: {e}", plan.section);
                Ok(None)
            }
        }
    }
}

impl Default for ImapMailboxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailFetcher for ImapMailboxClient {
    async fn test_connection(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
    ) -> Result<MailboxProbe, MailboxError> {
        let mut auth = self.open_authenticated(endpoint, credential).await?;
        let items = self
            .timed(auth.status(&self.mailbox, &["MESSAGES", "UNSEEN"]))
            .await?;

        let mut probe = MailboxProbe {
            reachable: true,
            total_count: 0,
            unseen_count: 0,
        };
        for (name, value) in items {
            if name.eq_ignore_ascii_case("MESSAGES") {
                probe.total_count = value;
            } else if name.eq_ignore_ascii_case("UNSEEN") {
                probe.unseen_count = value;
            }
        }

        if let Err(e) = auth.logout().await {
            debug!("logout after probe failed: {e}");
        }
        Ok(probe)
    }

    async fn fetch_unseen(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
        checkpoint: &Checkpoint,
        limit: usize,
    ) -> Result<Vec<RawMessage>, MailboxError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (mut session, _snapshot) = self.open_session(endpoint, credential).await?;

        let Some(key) = search_key_for(checkpoint) else {
            let _ = session.logout().await;
            return Ok(Vec::new());
        };

        let mut uids: Vec<u32> = self
            .timed(session.uid_search(&key))
            .await?
            .into_iter()
            .map(Uid::get)
            .collect();
        // A SINCE fallback is day-granular and can return already-processed
        // messages; the checkpoint stays the real cutoff.
        if let Some(last) = checkpoint.last_uid {
            uids.retain(|&u| u > last);
        }
        uids.sort_unstable();
        // Oldest first, so an interrupted batch leaves the checkpoint
        // contiguous with no gap behind it.
        uids.truncate(limit);

        if uids.is_empty() {
            let _ = session.logout().await;
            return Ok(Vec::new());
        }

        let overview = self
            .timed(session.uid_fetch(
                &UidSet::from_values(&uids),
                &[
                    FetchAttribute::Uid,
                    FetchAttribute::Envelope,
                    FetchAttribute::BodyStructure,
                ],
            ))
            .await?;

        let mut messages = self.collect_messages(&mut session, overview).await?;
        messages.sort_unstable_by_key(|m| m.uid);

        if let Err(e) = session.logout().await {
            debug!("logout after fetch failed: {e}");
        }
        Ok(messages)
    }

    async fn fetch_recent(
        &self,
        endpoint: &ImapEndpoint,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<RawMessage>, MailboxError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (mut session, snapshot) = self.open_session(endpoint, credential).await?;
        if snapshot.exists == 0 {
            let _ = session.logout().await;
            return Ok(Vec::new());
        }

        let count = u32::try_from(limit).unwrap_or(u32::MAX);
        let start = snapshot
            .exists
            .saturating_sub(count.saturating_sub(1))
            .max(1);
        let Some(set) = SeqSet::range(start, snapshot.exists) else {
            let _ = session.logout().await;
            return Ok(Vec::new());
        };

        let overview = self
            .timed(session.fetch(
                &set,
                &[
                    FetchAttribute::Uid,
                    FetchAttribute::Envelope,
                    FetchAttribute::BodyStructure,
                ],
            ))
            .await?;

        let mut messages = self.collect_messages(&mut session, overview).await?;
        messages.sort_unstable_by(|a, b| b.uid.cmp(&a.uid));

        if let Err(e) = session.logout().await {
            debug!("logout after fetch failed: {e}");
        }
        Ok(messages)
    }
}

fn map_imap(e: ImapError) -> MailboxError {
    match e {
        ImapError::Auth(text) => MailboxError::AuthFailure(text),
        ImapError::Timeout(elapsed) => MailboxError::Timeout(elapsed),
        other => MailboxError::Protocol(other.to_string()),
    }
}

/// What to pull for one message: the first plain-text section plus every
/// image section worth fetching.
#[derive(Debug, Default)]
struct FetchPlan {
    text: Option<SectionPlan>,
    images: Vec<SectionPlan>,
}

#[derive(Debug, Clone)]
struct SectionPlan {
    section: String,
    encoding: String,
    charset: Option<String>,
    filename: Option<String>,
    subtype: String,
}

fn plan_sections(structure: Option<&BodyStructure>) -> FetchPlan {
    let Some(structure) = structure else {
        // No BODYSTRUCTURE to go by; ask for the whole text portion and
        // hope it is readable as-is.
        return FetchPlan {
            text: Some(SectionPlan {
                section: "TEXT".to_string(),
                encoding: "7BIT".to_string(),
                charset: None,
                filename: None,
                subtype: "PLAIN".to_string(),
            }),
            images: Vec::new(),
        };
    };

    let mut plan = FetchPlan::default();
    let mut html_fallback = None;

    for (path, leaf) in structure.walk_leaves() {
        let BodyStructure::Part {
            media_subtype,
            params,
            encoding,
            size,
            ..
        } = leaf
        else {
            continue;
        };

        if plan.text.is_none() && leaf.is_media("TEXT", Some("PLAIN")) {
            plan.text = Some(section_plan(&path, media_subtype, params, encoding));
        } else if html_fallback.is_none() && leaf.is_media("TEXT", None) {
            html_fallback = Some(section_plan(&path, media_subtype, params, encoding));
        } else if leaf.is_media("IMAGE", None) {
            if *size <= MAX_IMAGE_BYTES {
                plan.images
                    .push(section_plan(&path, media_subtype, params, encoding));
            } else {
                debug!("skipping oversized image section {path} ({size} octets)");
            }
        }
        // Anything else is never fetched.
    }

    if plan.text.is_none() {
        plan.text = html_fallback;
    }
    plan
}

fn section_plan(
    path: &str,
    subtype: &str,
    params: &[(String, String)],
    encoding: &str,
) -> SectionPlan {
    SectionPlan {
        section: path.to_string(),
        encoding: encoding.to_string(),
        charset: param(params, "CHARSET"),
        filename: param(params, "NAME"),
        subtype: subtype.to_string(),
    }
}

fn param(params: &[(String, String)], key: &str) -> Option<String> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.clone())
}

/// Picks the narrowest server-side filter the checkpoint allows. `None`
/// means nothing newer can exist.
fn search_key_for(checkpoint: &Checkpoint) -> Option<SearchKey> {
    if let Some(last) = checkpoint.last_uid {
        let next = Uid::new(last.checked_add(1)?)?;
        return Some(SearchKey::UidIn(UidSet::RangeFrom(next)));
    }
    Some(match checkpoint.last_seen.and_then(to_imap_date) {
        Some(date) => SearchKey::Since(date),
        // First contact with this mailbox: seed from what the provider
        // considers unread.
        None => SearchKey::Unseen,
    })
}

fn to_imap_date(seen: DateTime<Utc>) -> Option<ImapDate> {
    let date = seen.date_naive();
    ImapDate::new(
        u16::try_from(date.year()).ok()?,
        u8::try_from(date.month()).ok()?,
        u8::try_from(date.day()).ok()?,
    )
}

fn parse_message_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn first_body(responses: Overview) -> Option<Vec<u8>> {
    responses
        .into_iter()
        .flat_map(|(_, items)| items)
        .find_map(|item| match item {
            FetchItem::Body { data, .. } => data,
            _ => None,
        })
}

fn format_address(addr: &Address) -> String {
    if let Some(name) = &addr.name
        && !name.is_empty()
    {
        return decode_header(name);
    }
    addr.email()
        .or_else(|| addr.mailbox.clone())
        .unwrap_or_default()
}

/// Caps the body at `max_chars`, dropping control characters other than
/// newlines along the way.
fn bounded_text(text: &str, max_chars: usize) -> String {
    text.chars()
        .filter(|c| *c == '\n' || !c.is_control())
        .take(max_chars)
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::unreadable_literal
)]
mod tests {
    use super::*;

    fn part(media_type: &str, subtype: &str, size: u32) -> BodyStructure {
        BodyStructure::Part {
            media_type: media_type.to_string(),
            media_subtype: subtype.to_string(),
            params: vec![("CHARSET".to_string(), "utf-8".to_string())],
            id: None,
            description: None,
            encoding: "BASE64".to_string(),
            size,
        }
    }

    #[test]
    fn test_search_key_uses_uid_range_above_checkpoint() {
        let checkpoint = Checkpoint {
            last_uid: Some(41),
            last_seen: Some(Utc::now()),
        };
        let key = search_key_for(&checkpoint).unwrap();
        assert_eq!(
            key,
            SearchKey::UidIn(UidSet::RangeFrom(Uid::new(42).unwrap()))
        );
    }

    #[test]
    fn test_search_key_falls_back_to_since_date() {
        let seen = DateTime::parse_from_rfc3339("2024-06-15T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let checkpoint = Checkpoint {
            last_uid: None,
            last_seen: Some(seen),
        };
        let key = search_key_for(&checkpoint).unwrap();
        assert_eq!(
            key,
            SearchKey::Since(ImapDate::new(2024, 6, 15).unwrap())
        );
    }

    #[test]
    fn test_search_key_first_contact_is_unseen() {
        let key = search_key_for(&Checkpoint::default()).unwrap();
        assert_eq!(key, SearchKey::Unseen);
    }

    #[test]
    fn test_search_key_exhausted_uid_space() {
        let checkpoint = Checkpoint {
            last_uid: Some(u32::MAX),
            last_seen: None,
        };
        assert!(search_key_for(&checkpoint).is_none());
    }

    #[test]
    fn test_plan_prefers_plain_text_and_keeps_images() {
        let structure = BodyStructure::Multipart {
            parts: vec![
                part("TEXT", "HTML", 2048),
                part("TEXT", "PLAIN", 1024),
                part("IMAGE", "PNG", 4096),
                part("APPLICATION", "PDF", 9000),
            ],
            subtype: "MIXED".to_string(),
        };

        let plan = plan_sections(Some(&structure));

        let text = plan.text.unwrap();
        assert_eq!(text.section, "2");
        assert_eq!(text.subtype, "PLAIN");
        assert_eq!(text.charset.as_deref(), Some("utf-8"));

        assert_eq!(plan.images.len(), 1);
        assert_eq!(plan.images[0].section, "3");
        assert_eq!(plan.images[0].subtype, "PNG");
    }

    #[test]
    fn test_plan_skips_oversized_images() {
        let structure = BodyStructure::Multipart {
            parts: vec![
                part("TEXT", "PLAIN", 512),
                part("IMAGE", "JPEG", MAX_IMAGE_BYTES + 1),
            ],
            subtype: "MIXED".to_string(),
        };

        let plan = plan_sections(Some(&structure));
        assert!(plan.images.is_empty());
    }

    #[test]
    fn test_plan_single_part_message() {
        let structure = part("TEXT", "PLAIN", 256);
        let plan = plan_sections(Some(&structure));
        assert_eq!(plan.text.unwrap().section, "1");
    }

    #[test]
    fn test_plan_without_structure_requests_text() {
        let plan = plan_sections(None);
        assert_eq!(plan.text.unwrap().section, "TEXT");
        assert!(plan.images.is_empty());
    }

    #[test]
    fn test_html_only_message_still_gets_text() {
        let structure = BodyStructure::Multipart {
            parts: vec![part("TEXT", "HTML", 2048), part("IMAGE", "GIF", 100)],
            subtype: "RELATED".to_string(),
        };
        let plan = plan_sections(Some(&structure));
        assert_eq!(plan.text.unwrap().subtype, "HTML");
    }

    #[test]
    fn test_bounded_text_cuts_and_cleans() {
        let text = "line one\r\nline two\u{7}";
        let bounded = bounded_text(text, 1000);
        assert_eq!(bounded, "line one\nline two");

        let long = "x".repeat(MAX_BODY_CHARS + 50);
        assert_eq!(bounded_text(&long, MAX_BODY_CHARS).chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn test_format_address_prefers_display_name() {
        let addr = Address {
            name: Some("Dana Reviewer".to_string()),
            route: None,
            mailbox: Some("dana".to_string()),
            host: Some("example.com".to_string()),
        };
        assert_eq!(format_address(&addr), "Dana Reviewer");

        let bare = Address {
            name: None,
            route: None,
            mailbox: Some("dana".to_string()),
            host: Some("example.com".to_string()),
        };
        assert_eq!(format_address(&bare), "dana@example.com");
    }

    #[test]
    fn test_format_address_decodes_encoded_name() {
        let addr = Address {
            name: Some("=?UTF-8?Q?Ren=C3=A9?=".to_string()),
            route: None,
            mailbox: Some("rene".to_string()),
            host: Some("example.com".to_string()),
        };
        assert_eq!(format_address(&addr), "René");
    }

    #[test]
    fn test_message_date_parsing() {
        let parsed = parse_message_date("Mon, 15 Jul 2024 10:30:00 +0200").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-07-15T08:30:00+00:00");
        assert!(parse_message_date("not a date").is_none());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(MailboxError::AuthFailure("denied".to_string()).is_fatal());
        assert!(MailboxError::NotFound("INBOX".to_string()).is_fatal());
        assert!(!MailboxError::Timeout(Duration::from_secs(30)).is_fatal());
        assert!(!MailboxError::Protocol("short read".to_string()).is_fatal());
    }

    #[test]
    fn test_imap_error_mapping() {
        assert!(matches!(
            map_imap(ImapError::Auth("bad login".to_string())),
            MailboxError::AuthFailure(_)
        ));
        assert!(matches!(
            map_imap(ImapError::Timeout(Duration::from_secs(5))),
            MailboxError::Timeout(_)
        ));
        assert!(matches!(
            map_imap(ImapError::ConnectionClosed),
            MailboxError::Protocol(_)
        ));
    }
}
