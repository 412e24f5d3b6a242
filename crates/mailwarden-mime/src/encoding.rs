//! Decoders for the encodings mail actually arrives in.
//!
//! Transfer encodings (Base64, Quoted-Printable) for bodies and
//! attachments, RFC 2047 encoded words for headers, and charset
//! conversion to `String`. Everything here is read-path only and leans
//! lenient: mail in the wild is malformed often enough that a poller
//! cannot afford to reject a message over one bad escape.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::Result;

/// Decodes Base64 data, tolerating the CRLF line wrapping mail inserts.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64 after whitespace
/// removal.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact).map_err(Into::into)
}

/// Decodes Quoted-Printable text (RFC 2045) into raw bytes.
///
/// Soft line breaks (`=` before CRLF) are removed. Malformed or truncated
/// escape sequences are passed through verbatim; a partial body fetch can
/// legitimately end mid-sequence.
#[must_use]
pub fn decode_quoted_printable(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        match bytes.get(i + 1..i + 3) {
            Some(b"\r\n") => i += 3,
            // Bare LF soft break
            Some(pair) if pair[0] == b'\n' => i += 2,
            Some(pair) => {
                if let Some(byte) = hex_pair(pair) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'=');
                    i += 1;
                }
            }
            None => {
                // Truncated at end of input
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 2;
                } else {
                    out.extend_from_slice(&bytes[i..]);
                    i = bytes.len();
                }
            }
        }
    }

    out
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    let hi = (pair[0] as char).to_digit(16)?;
    let lo = (pair[1] as char).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}

/// Decodes a body by its declared Content-Transfer-Encoding.
///
/// `7bit`, `8bit`, `binary`, and unrecognized encodings pass through
/// unchanged; callers log the unknown name.
///
/// # Errors
///
/// Returns an error only for invalid Base64.
pub fn decode_transfer(encoding: &str, data: &[u8]) -> Result<Vec<u8>> {
    match encoding.to_ascii_uppercase().as_str() {
        "BASE64" => decode_base64(&String::from_utf8_lossy(data)),
        "QUOTED-PRINTABLE" => Ok(decode_quoted_printable(&String::from_utf8_lossy(data))),
        _ => Ok(data.to_vec()),
    }
}

/// Converts decoded bytes to a `String` honoring the declared charset.
///
/// UTF-8 and US-ASCII decode lossily; Latin-1 maps each byte to its code
/// point. Other charsets (including the Windows-125x family) fall back to
/// lossy UTF-8, which keeps the ASCII majority of such text intact.
#[must_use]
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    let charset = charset.unwrap_or("utf-8").to_ascii_lowercase();
    match charset.as_str() {
        "iso-8859-1" | "latin1" | "latin-1" => bytes.iter().map(|&b| b as char).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes RFC 2047 encoded words anywhere in a header value.
///
/// Handles multiple encoded words in one header; whitespace between two
/// adjacent encoded words is dropped per the RFC. Words that fail to
/// decode are kept verbatim, so this never fails and a mangled subject
/// still reaches the classifier.
#[must_use]
pub fn decode_header(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }

    let mut out = String::new();
    let mut rest = value;
    let mut previous_was_word = false;

    while let Some((start, end)) = find_encoded_word(rest) {
        let gap = &rest[..start];
        let word = &rest[start..end];

        if !(previous_was_word && gap.chars().all(char::is_whitespace)) {
            out.push_str(gap);
        }

        match decode_encoded_word(word) {
            Some(decoded) => {
                out.push_str(&decoded);
                previous_was_word = true;
            }
            None => {
                out.push_str(word);
                previous_was_word = false;
            }
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Locates the next `=?charset?enc?payload?=` span in `s`.
fn find_encoded_word(s: &str) -> Option<(usize, usize)> {
    let start = s.find("=?")?;
    let after_charset = s[start + 2..].find('?')? + start + 2;
    let after_encoding = s[after_charset + 1..].find('?')? + after_charset + 1;
    let close = s[after_encoding + 1..].find("?=")? + after_encoding + 1;
    Some((start, close + 2))
}

fn decode_encoded_word(word: &str) -> Option<String> {
    let inner = word.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.splitn(3, '?');
    let charset = parts.next()?;
    let encoding = parts.next()?;
    let payload = parts.next()?;

    // A charset may carry an RFC 2231 language suffix
    let charset = charset.split('*').next()?;

    let bytes = match encoding {
        "B" | "b" => decode_base64(payload).ok()?,
        "Q" | "q" => decode_quoted_printable(&payload.replace('_', " ")),
        _ => return None,
    };
    Some(decode_text(&bytes, Some(charset)))
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

    #[test]
    fn test_base64_plain() {
        assert_eq!(decode_base64("SGVsbG8=").unwrap(), b"Hello");
    }

    #[test]
    fn test_base64_line_wrapped() {
        let wrapped = "SGVsbG8s\r\nIFdvcmxk\r\nIQ==";
        assert_eq!(decode_base64(wrapped).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_base64_invalid() {
        assert!(decode_base64("not!!valid").is_err());
    }

    #[test]
    fn test_quoted_printable_plain() {
        assert_eq!(decode_quoted_printable("Hello, World!"), b"Hello, World!");
    }

    #[test]
    fn test_quoted_printable_escapes() {
        assert_eq!(
            String::from_utf8(decode_quoted_printable("H=C3=A9llo")).unwrap(),
            "Héllo"
        );
    }

    #[test]
    fn test_quoted_printable_soft_break() {
        assert_eq!(decode_quoted_printable("Hello=\r\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_bad_escape_kept() {
        assert_eq!(decode_quoted_printable("50=ZZ off"), b"50=ZZ off");
    }

    #[test]
    fn test_quoted_printable_truncated_escape_kept() {
        assert_eq!(decode_quoted_printable("cut =C"), b"cut =C");
        assert_eq!(decode_quoted_printable("cut ="), b"cut =");
    }

    #[test]
    fn test_transfer_base64() {
        let decoded = decode_transfer("BASE64", b"SGVsbG8=").unwrap();
        assert_eq!(decoded, b"Hello");
    }

    #[test]
    fn test_transfer_passthrough() {
        assert_eq!(decode_transfer("7BIT", b"plain").unwrap(), b"plain");
        assert_eq!(decode_transfer("8bit", b"plain").unwrap(), b"plain");
        assert_eq!(decode_transfer("x-unknown", b"plain").unwrap(), b"plain");
    }

    #[test]
    fn test_decode_text_latin1() {
        // 0xE9 is é in Latin-1 and invalid alone in UTF-8
        assert_eq!(decode_text(b"caf\xE9", Some("ISO-8859-1")), "café");
    }

    #[test]
    fn test_decode_text_utf8_default() {
        assert_eq!(decode_text("café".as_bytes(), None), "café");
    }

    #[test]
    fn test_decode_text_unknown_charset_is_lossy() {
        let out = decode_text(b"ok \xFF", Some("x-mystery"));
        assert!(out.starts_with("ok "));
    }

    #[test]
    fn test_header_plain_passthrough() {
        assert_eq!(decode_header("Team update"), "Team update");
    }

    #[test]
    fn test_header_base64_word() {
        assert_eq!(decode_header("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_header_q_word_with_underscores() {
        assert_eq!(
            decode_header("=?utf-8?Q?caf=C3=A9_time?="),
            "café time"
        );
    }

    #[test]
    fn test_header_adjacent_words_drop_whitespace() {
        let value = "=?utf-8?B?SGVsbG8=?= =?utf-8?B?IFdvcmxk?=";
        assert_eq!(decode_header(value), "Hello World");
    }

    #[test]
    fn test_header_mixed_text_and_words() {
        let value = "Re: =?utf-8?B?SMOpbGxv?= there";
        assert_eq!(decode_header(value), "Re: Héllo there");
    }

    #[test]
    fn test_header_malformed_word_kept() {
        let value = "=?utf-8?X?garbage?=";
        assert_eq!(decode_header(value), value);
    }

    #[test]
    fn test_header_latin1_word() {
        // "=?iso-8859-1?Q?m=F8te?=" is "møte"
        assert_eq!(decode_header("=?iso-8859-1?Q?m=F8te?="), "møte");
    }

    mod property_tests {
        use std::fmt::Write as _;

        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn test_base64_round_trips_wrapped_payloads(
                data in proptest::collection::vec(any::<u8>(), 0..256),
            ) {
                let encoded = STANDARD.encode(&data);
                let wrapped: String = encoded
                    .as_bytes()
                    .chunks(60)
                    .map(|chunk| std::str::from_utf8(chunk).unwrap())
                    .collect::<Vec<_>>()
                    .join("\r\n");
                prop_assert_eq!(decode_base64(&wrapped).unwrap(), data);
            }

            #[test]
            fn test_quoted_printable_round_trips_escaped_bytes(
                data in proptest::collection::vec(any::<u8>(), 0..128),
            ) {
                let mut encoded = String::new();
                for &b in &data {
                    if b.is_ascii_alphanumeric() {
                        encoded.push(b as char);
                    } else {
                        // Writing to a String never fails
                        let _ = write!(encoded, "={b:02X}");
                    }
                }
                prop_assert_eq!(decode_quoted_printable(&encoded), data);
            }

            #[test]
            fn test_header_b_word_round_trips(text in any::<String>()) {
                let word = format!("=?utf-8?B?{}?=", STANDARD.encode(text.as_bytes()));
                prop_assert_eq!(decode_header(&word), text);
            }
        }
    }
}
