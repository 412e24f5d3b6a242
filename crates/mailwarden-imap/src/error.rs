//! Error types for the IMAP client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Response could not be parsed.
    #[error("parse error at position {position}: {message}")]
    Parse {
        /// Byte offset where parsing failed.
        position: usize,
        /// Description of the failure.
        message: String,
    },

    /// Authentication was rejected by the server.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Server replied NO to a command.
    #[error("server refused command: {0}")]
    No(String),

    /// Server replied BAD to a command.
    #[error("server rejected command: {0}")]
    Bad(String),

    /// Server is closing the connection.
    #[error("server closed connection: {0}")]
    Bye(String),

    /// Operation did not complete within the allowed time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was closed unexpectedly.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Protocol violation or unexpected server behavior.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

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

    #[test]
    fn test_error_display() {
        let err = Error::Auth("LOGIN failed".to_string());
        assert_eq!(err.to_string(), "authentication failed: LOGIN failed");

        let err = Error::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));

        let err = Error::Parse {
            position: 7,
            message: "expected atom".to_string(),
        };
        assert!(err.to_string().contains("position 7"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
