//! # mailwarden-core
//!
//! Core monitoring engine for `MailWarden`.
//!
//! This crate provides:
//! - Account management and credential storage
//! - IMAP mailbox polling with resumable checkpoints
//! - **Violation Detection** - keyword, pattern, and vision-assisted
//!   screening of message text and image attachments
//! - Finding persistence (`SQLite`)
//! - Per-account monitor lifecycle supervision
//! - Event push toward notification channels

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod classify;
mod error;
pub mod findings;
pub mod mailbox;
pub mod monitor;
pub mod notify;
pub mod vision;

pub use account::{
    Account, AccountId, Credential, CredentialError, CredentialResult, CredentialStore,
    ImapEndpoint, KeyringCredentialStore, MemoryCredentialStore, Security,
};
pub use classify::{Assessment, CategoryMatch, Classifier, ImageAnnotation, RiskLevel, Severity};
pub use error::{Error, Result};
pub use findings::{
    Finding, FindingId, FindingStatus, MemoryViolationStore, SqliteViolationStore, ViolationStore,
};
pub use mailbox::{ImapMailboxClient, MailFetcher, MailboxError, MailboxProbe, RawMessage};
pub use monitor::{
    Category, ChannelKind, Checkpoint, MonitorDeps, MonitorRegistry, MonitorState, MonitorStatus,
    MonitoringConfig, PollFrequency, Sensitivity,
};
pub use notify::{MonitorEvent, NotificationHub};
pub use vision::{HttpVisionClassifier, VisionClassifier, VisionError};
