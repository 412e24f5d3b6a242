//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
///
/// Mailbox access and credential storage carry their own error types
/// ([`crate::mailbox::MailboxError`], [`crate::account::CredentialError`])
/// because monitors react to those by kind rather than propagating them.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A classifier lexicon pattern failed to compile.
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Remote vision HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
