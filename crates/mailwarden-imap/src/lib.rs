//! # mailwarden-imap
//!
//! Async IMAP4 client for mailbox polling. Implements the RFC 3501/9051
//! subset a monitoring poller needs: LOGIN, EXAMINE/SELECT, STATUS,
//! UID SEARCH, and UID FETCH, over TLS via rustls.
//!
//! The crate is built around short-lived sessions: a caller connects, logs
//! in, reads what it needs, and logs out, once per polling cycle. There is
//! no IDLE and no connection reuse. Body content is only ever requested
//! with `BODY.PEEK`, so polling never changes flag state on the server.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailwarden_imap::{Client, FetchAttribute, SearchKey, UidSet};
//!
//! #[tokio::main]
//! async fn main() -> mailwarden_imap::Result<()> {
//!     let stream = mailwarden_imap::connect_tls("imap.example.com", 993).await?;
//!     let client = Client::from_stream(stream).await?;
//!     let client = client.login("user@example.com", "app-password").await?;
//!
//!     let mailbox = mailwarden_imap::Mailbox::inbox();
//!     let (mut client, snapshot) = client.examine(&mailbox).await?;
//!     println!("{} messages", snapshot.exists);
//!
//!     let uids = client.uid_search(&SearchKey::Unseen).await?;
//!     if !uids.is_empty() {
//!         let raw: Vec<u32> = uids.iter().map(|u| u.get()).collect();
//!         let fetched = client
//!             .uid_fetch(
//!                 &UidSet::from_values(&raw),
//!                 &[FetchAttribute::Uid, FetchAttribute::Envelope],
//!             )
//!             .await?;
//!         println!("{} envelopes", fetched.len());
//!     }
//!
//!     client.logout().await
//! }
//! ```
//!
//! ## Connection States
//!
//! The client is type-stated: `NotAuthenticated` after the greeting,
//! `Authenticated` after `login`, `Selected` after `examine`/`select`.
//! Each state exposes only the commands valid in it.
//!
//! ## Modules
//!
//! - [`command`]: command serialization and tag generation
//! - [`connection`]: transport, framing, and the type-state client
//! - [`parser`]: sans-I/O response parser
//! - [`types`]: protocol types (UIDs, flags, mailboxes, sets)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::{Command, FetchAttribute, ImapDate, SearchKey, TagGenerator};
pub use connection::{
    Authenticated, Client, FramedStream, ImapStream, NotAuthenticated, Selected, connect_plain,
    connect_tls,
};
pub use error::{Error, Result};
pub use parser::{
    Address, BodyStructure, Envelope, FetchItem, Response, ResponseParser, UntaggedResponse,
};
pub use types::{
    Flag, Mailbox, MailboxSnapshot, ResponseCode, SeqNum, SeqSet, Status, Uid, UidSet, UidValidity,
};
