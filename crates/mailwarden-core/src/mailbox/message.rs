//! Fetched message representation.

use chrono::{DateTime, Utc};

/// Longest plain-text body the fetch layer hands to the classifier, in
/// characters.
pub const MAX_BODY_CHARS: usize = 4096;

/// Largest image attachment the fetch layer will download, in bytes.
/// Bigger parts are skipped without fetching their content.
pub const MAX_IMAGE_BYTES: u32 = 5 * 1024 * 1024;

/// One message pulled from a mailbox, reduced to what classification
/// needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Provider-assigned UID within the mailbox.
    pub uid: u32,
    /// Message-ID header, or a synthesized `<uid-N>` stand-in when the
    /// header is missing.
    pub message_id: String,
    /// Decoded subject.
    pub subject: String,
    /// Sender, as `display name` or `local@domain`.
    pub from: String,
    /// First recipient, same formatting as `from`.
    pub to: String,
    /// Parsed Date header.
    pub date: Option<DateTime<Utc>>,
    /// Decoded plain-text body, truncated to [`MAX_BODY_CHARS`].
    pub body: String,
    /// Image attachments, already transfer-decoded.
    pub images: Vec<ImageAttachment>,
}

impl RawMessage {
    /// The classifier corpus: subject and body joined, lowercased by the
    /// caller.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }
}

/// A decoded `image/*` attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Filename from the part parameters, or `attachment-<section>`.
    pub filename: String,
    /// Declared content type, e.g. `image/png`.
    pub content_type: String,
    /// Decoded image bytes.
    pub data: Vec<u8>,
}

/// Result of probing a mailbox with a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxProbe {
    /// Whether a session could be opened and the inbox queried.
    pub reachable: bool,
    /// Total messages in the inbox.
    pub total_count: u32,
    /// Messages without the `\Seen` flag.
    pub unseen_count: u32,
}

impl MailboxProbe {
    /// A failed probe.
    #[must_use]
    pub const fn unreachable() -> Self {
        Self {
            reachable: false,
            total_count: 0,
            unseen_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_joins_subject_and_body() {
        let message = RawMessage {
            uid: 1,
            message_id: "<a@b>".to_string(),
            subject: "Team update".to_string(),
            from: "ana@example.com".to_string(),
            to: "bob@example.com".to_string(),
            date: None,
            body: "Let's circle back Monday".to_string(),
            images: Vec::new(),
        };
        assert_eq!(message.text(), "Team update\nLet's circle back Monday");
    }

    #[test]
    fn test_unreachable_probe() {
        let probe = MailboxProbe::unreachable();
        assert!(!probe.reachable);
        assert_eq!(probe.total_count, 0);
    }
}
