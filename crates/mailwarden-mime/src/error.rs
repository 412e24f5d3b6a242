//! Error types for MIME decoding.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME decode error types.
///
/// Decoding is deliberately lenient: malformed quoted-printable escapes and
/// unknown charsets degrade to verbatim or lossy output instead of failing.
/// Only structurally invalid input errors out.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
