//! Read-only mailbox access.
//!
//! [`MailFetcher`] is the seam between monitors and the wire: production
//! code uses the IMAP-backed [`ImapMailboxClient`], tests substitute a
//! scripted mailbox.

mod client;
mod message;

pub use client::{ImapMailboxClient, MailFetcher, MailboxError};
pub use message::{ImageAttachment, MAX_BODY_CHARS, MAX_IMAGE_BYTES, MailboxProbe, RawMessage};
