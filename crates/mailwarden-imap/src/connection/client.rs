//! Type-state session client.
//!
//! The `State` parameter tracks the protocol state at compile time:
//! `NotAuthenticated` after the greeting, `Authenticated` after LOGIN,
//! `Selected` once a mailbox is open. Each state exposes only the commands
//! valid in it, and transitions consume the client.

#![allow(clippy::missing_errors_doc)]

use std::marker::PhantomData;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::framed::FramedStream;
use crate::command::{Command, FetchAttribute, SearchKey, TagGenerator};
use crate::parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
use crate::types::{
    Mailbox, MailboxSnapshot, ResponseCode, SeqNum, SeqSet, Status, Uid, UidSet,
};
use crate::{Error, Result};

/// Marker for the pre-login state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Marker for the post-login state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// Marker for the mailbox-selected state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selected;

/// Session client, parameterized by protocol state.
pub struct Client<S, State> {
    stream: FramedStream<S>,
    tags: TagGenerator,
    _state: PhantomData<State>,
}

impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends one command, reads through its tagged completion, and checks it.
    async fn exec(&mut self, command: &Command) -> Result<Vec<Bytes>> {
        let tag = self.tags.next();
        self.stream.write_command(&command.serialize(&tag)).await?;
        let responses = self.stream.read_until_tagged(&tag).await?;
        check_tagged(&responses, &tag)?;
        Ok(responses)
    }

    /// Sends NOOP.
    pub async fn noop(&mut self) -> Result<()> {
        self.exec(&Command::Noop).await.map(drop)
    }

    /// Queries server capabilities.
    pub async fn capability(&mut self) -> Result<Vec<String>> {
        let responses = self.exec(&Command::Capability).await?;
        for raw in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Capability(caps))) =
                ResponseParser::parse(raw)
            {
                return Ok(caps);
            }
        }
        Ok(Vec::new())
    }

    /// Sends LOGOUT and drops the connection. Server errors at this point
    /// are ignored; the session is over either way.
    async fn finish(mut self) -> Result<()> {
        let tag = self.tags.next();
        self.stream
            .write_command(&Command::Logout.serialize(&tag))
            .await?;
        let _ = self.stream.read_until_tagged(&tag).await;
        Ok(())
    }

    fn transition<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            _state: PhantomData,
        }
    }
}

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream and consumes the server greeting.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);
        let greeting = framed.read_response().await?;

        match ResponseParser::parse(&greeting)? {
            Response::Untagged(UntaggedResponse::Bye { text }) => return Err(Error::Bye(text)),
            Response::Untagged(
                UntaggedResponse::Ok { .. } | UntaggedResponse::PreAuth { .. },
            ) => {}
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }

        Ok(Self {
            stream: framed,
            tags: TagGenerator::default(),
            _state: PhantomData,
        })
    }

    /// Authenticates with LOGIN.
    ///
    /// Any NO completion is reported as [`Error::Auth`]: a rejected LOGIN
    /// means the credentials were not accepted, whether or not the server
    /// attached an AUTHENTICATIONFAILED code.
    pub async fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        let command = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        match self.exec(&command).await {
            Ok(_) => Ok(self.transition()),
            Err(Error::No(text)) => Err(Error::Auth(text)),
            Err(e) => Err(e),
        }
    }

    /// Ends the session without authenticating.
    pub async fn logout(self) -> Result<()> {
        self.finish().await
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Opens a mailbox read-only via EXAMINE.
    ///
    /// Polling always goes through here so the session cannot change
    /// flags or expunge state server-side.
    pub async fn examine(
        mut self,
        mailbox: &Mailbox,
    ) -> Result<(Client<S, Selected>, MailboxSnapshot)> {
        let responses = self.exec(&Command::Examine(mailbox.clone())).await?;
        let snapshot = collect_snapshot(&responses);
        Ok((self.transition(), snapshot))
    }

    /// Opens a mailbox read-write via SELECT.
    pub async fn select(
        mut self,
        mailbox: &Mailbox,
    ) -> Result<(Client<S, Selected>, MailboxSnapshot)> {
        let responses = self.exec(&Command::Select(mailbox.clone())).await?;
        let snapshot = collect_snapshot(&responses);
        Ok((self.transition(), snapshot))
    }

    /// Queries mailbox counters without selecting it.
    pub async fn status(
        &mut self,
        mailbox: &Mailbox,
        items: &[&str],
    ) -> Result<Vec<(String, u32)>> {
        let command = Command::Status {
            mailbox: mailbox.clone(),
            items: items.iter().map(ToString::to_string).collect(),
        };
        let responses = self.exec(&command).await?;
        for raw in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Status { items, .. })) =
                ResponseParser::parse(raw)
            {
                return Ok(items);
            }
        }
        Ok(Vec::new())
    }

    /// Ends the session.
    pub async fn logout(self) -> Result<()> {
        self.finish().await
    }
}

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs UID SEARCH, returning matching UIDs in server order.
    pub async fn uid_search(&mut self, key: &SearchKey) -> Result<Vec<Uid>> {
        let responses = self.exec(&Command::UidSearch(key.clone())).await?;
        let mut uids = Vec::new();
        for raw in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Search(hits))) =
                ResponseParser::parse(raw)
            {
                uids.extend(hits.into_iter().filter_map(Uid::new));
            }
        }
        Ok(uids)
    }

    /// Fetches data items by UID.
    pub async fn uid_fetch(
        &mut self,
        set: &UidSet,
        items: &[FetchAttribute],
    ) -> Result<Vec<(SeqNum, Vec<FetchItem>)>> {
        let command = Command::UidFetch {
            set: set.clone(),
            items: items.to_vec(),
        };
        self.run_fetch(&command).await
    }

    /// Fetches data items by sequence number.
    pub async fn fetch(
        &mut self,
        set: &SeqSet,
        items: &[FetchAttribute],
    ) -> Result<Vec<(SeqNum, Vec<FetchItem>)>> {
        let command = Command::Fetch {
            set: set.clone(),
            items: items.to_vec(),
        };
        self.run_fetch(&command).await
    }

    async fn run_fetch(&mut self, command: &Command) -> Result<Vec<(SeqNum, Vec<FetchItem>)>> {
        let responses = self.exec(command).await?;
        let mut results = Vec::new();
        for raw in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Fetch { seq, items })) =
                ResponseParser::parse(raw)
            {
                results.push((seq, items));
            }
        }
        Ok(results)
    }

    /// Ends the session.
    pub async fn logout(self) -> Result<()> {
        self.finish().await
    }
}

/// Finds the tagged completion and maps NO/BAD/BYE to errors.
///
/// NO with an AUTHENTICATIONFAILED code becomes [`Error::Auth`] so callers
/// can tell bad credentials from other refusals.
fn check_tagged(responses: &[Bytes], tag: &str) -> Result<()> {
    for raw in responses.iter().rev() {
        if let Ok(Response::Tagged {
            tag: response_tag,
            status,
            code,
            text,
        }) = ResponseParser::parse(raw)
            && response_tag == tag
        {
            return match status {
                Status::Ok | Status::PreAuth => Ok(()),
                Status::No if code == Some(ResponseCode::AuthenticationFailed) => {
                    Err(Error::Auth(text))
                }
                Status::No => Err(Error::No(text)),
                Status::Bad => Err(Error::Bad(text)),
                Status::Bye => Err(Error::Bye(text)),
            };
        }
    }
    Err(Error::Protocol("missing tagged completion".to_string()))
}

/// Folds the untagged responses of SELECT/EXAMINE into a snapshot.
fn collect_snapshot(responses: &[Bytes]) -> MailboxSnapshot {
    let mut snapshot = MailboxSnapshot::default();
    for raw in responses {
        let Ok(Response::Untagged(untagged)) = ResponseParser::parse(raw) else {
            continue;
        };
        match untagged {
            UntaggedResponse::Exists(n) => snapshot.exists = n,
            UntaggedResponse::Recent(n) => snapshot.recent = n,
            UntaggedResponse::Ok { code: Some(code), .. } => match code {
                ResponseCode::Unseen(seq) => snapshot.unseen = Some(seq),
                ResponseCode::UidValidity(v) => snapshot.uid_validity = Some(v),
                ResponseCode::UidNext(uid) => snapshot.uid_next = Some(uid),
                _ => {}
            },
            _ => {}
        }
    }
    snapshot
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn bytes(lines: &[&str]) -> Vec<Bytes> {
        lines
            .iter()
            .map(|l| Bytes::copy_from_slice(l.as_bytes()))
            .collect()
    }

    #[test]
    fn test_check_tagged_ok() {
        let responses = bytes(&["* 3 EXISTS\r\n", "W0000 OK done\r\n"]);
        assert!(check_tagged(&responses, "W0000").is_ok());
    }

    #[test]
    fn test_check_tagged_no_becomes_error() {
        let responses = bytes(&["W0000 NO try later\r\n"]);
        assert!(matches!(
            check_tagged(&responses, "W0000"),
            Err(Error::No(t)) if t == "try later"
        ));
    }

    #[test]
    fn test_check_tagged_auth_code() {
        let responses = bytes(&["W0000 NO [AUTHENTICATIONFAILED] bad password\r\n"]);
        assert!(matches!(
            check_tagged(&responses, "W0000"),
            Err(Error::Auth(t)) if t == "bad password"
        ));
    }

    #[test]
    fn test_check_tagged_missing() {
        let responses = bytes(&["* 3 EXISTS\r\n"]);
        assert!(matches!(
            check_tagged(&responses, "W0000"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_collect_snapshot() {
        let responses = bytes(&[
            "* 12 EXISTS\r\n",
            "* 2 RECENT\r\n",
            "* OK [UNSEEN 5] first unseen\r\n",
            "* OK [UIDVALIDITY 99] valid\r\n",
            "* OK [UIDNEXT 1000] next\r\n",
            "W0000 OK [READ-ONLY] EXAMINE completed\r\n",
        ]);
        let snapshot = collect_snapshot(&responses);
        assert_eq!(snapshot.exists, 12);
        assert_eq!(snapshot.recent, 2);
        assert_eq!(snapshot.unseen.unwrap().get(), 5);
        assert_eq!(snapshot.uid_validity.unwrap().get(), 99);
        assert_eq!(snapshot.uid_next.unwrap().get(), 1000);
    }
}
