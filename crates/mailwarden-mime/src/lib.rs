//! # mailwarden-mime
//!
//! MIME decoding for mail monitoring.
//!
//! ## Features
//!
//! - **Transfer encodings**: Base64 and Quoted-Printable decoding
//! - **Header decoding**: RFC 2047 encoded-words (`=?charset?B?...?=`)
//! - **Content types**: Parsing with charset, name, and other parameters
//! - **Charset conversion**: UTF-8 and Latin-1 body text to `String`
//!
//! This crate only decodes. Message composition is out of scope: the
//! monitoring pipeline reads mail, it never sends any.
//!
//! ## Quick Start
//!
//! ### Decoding fetched body parts
//!
//! ```ignore
//! use mailwarden_mime::{ContentType, encoding};
//!
//! let content_type = ContentType::parse("text/plain; charset=iso-8859-1")?;
//! let bytes = encoding::decode_transfer("QUOTED-PRINTABLE", raw_part)?;
//! let text = encoding::decode_text(&bytes, content_type.charset());
//! ```
//!
//! ### Decoding headers
//!
//! ```ignore
//! use mailwarden_mime::encoding::decode_header;
//!
//! let subject = decode_header("=?UTF-8?B?SGVsbG8sIFdvcmxkIQ==?=");
//! assert_eq!(subject, "Hello, World!");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;

pub mod encoding;

pub use content_type::ContentType;
pub use error::{Error, Result};
