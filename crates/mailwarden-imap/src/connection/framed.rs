//! CRLF and literal framing.
//!
//! Responses are CRLF-terminated lines; a line ending in `{n}` continues
//! with n bytes of literal data and another line. `read_response` returns
//! one logical response with all literals inlined.

#![allow(clippy::missing_errors_doc)]

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const READ_CAPACITY: usize = 8 * 1024;

/// Upper bound on a single response line.
const MAX_LINE_LEN: usize = 512 * 1024;

/// Upper bound on a single literal. Caps what a hostile server can make us
/// buffer; well above the attachment sizes the fetch layer requests.
const MAX_LITERAL_LEN: usize = 8 * 1024 * 1024;

/// Buffered command/response transport over one connection.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    scratch: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_CAPACITY, stream),
            scratch: BytesMut::with_capacity(READ_CAPACITY),
        }
    }

    /// Reads one logical response, literals inlined.
    pub async fn read_response(&mut self) -> Result<Bytes> {
        let mut response = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let literal = literal_length(&line);
            response.extend_from_slice(&line);

            match literal {
                Some(n) if n > MAX_LITERAL_LEN => {
                    return Err(Error::Protocol(format!(
                        "literal of {n} bytes exceeds the {MAX_LITERAL_LEN} byte cap"
                    )));
                }
                Some(n) => {
                    let start = response.len();
                    response.resize(start + n, 0);
                    self.reader.read_exact(&mut response[start..]).await?;
                }
                None => break,
            }
        }
        Ok(response.freeze())
    }

    /// Reads responses until the one tagged with `tag`, inclusive.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Bytes>> {
        let mut responses = Vec::new();
        loop {
            let response = self.read_response().await?;
            let done = response
                .strip_prefix(tag.as_bytes())
                .is_some_and(|rest| rest.first() == Some(&b' '));
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }

    /// Writes one serialized command and flushes.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads one CRLF-terminated line, CRLF included.
    async fn read_line(&mut self) -> Result<Bytes> {
        self.scratch.clear();
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::ConnectionClosed);
            }

            // CRLF may straddle two reads
            if self.scratch.last() == Some(&b'\r') && buf[0] == b'\n' {
                self.scratch.extend_from_slice(b"\n");
                self.reader.consume(1);
                break;
            }

            if let Some(pos) = find_crlf(buf) {
                self.scratch.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                break;
            }

            let len = buf.len();
            self.scratch.extend_from_slice(buf);
            self.reader.consume(len);

            if self.scratch.len() > MAX_LINE_LEN {
                return Err(Error::Protocol("response line too long".to_string()));
            }
        }
        Ok(self.scratch.split().freeze())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Extracts the literal length from a line ending in `{n}` or `{n+}`.
fn literal_length(line: &[u8]) -> Option<usize> {
    let body = line.strip_suffix(b"\r\n")?;
    let body = body.strip_suffix(b"}")?;
    let body = body.strip_suffix(b"+").unwrap_or(body);
    let open = body.iter().rposition(|&b| b == b'{')?;
    let digits = &body[open + 1..];
    if digits.is_empty() {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
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
    use tokio_test::io::Builder;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"bare\n"), None);
        assert_eq!(find_crlf(b"bare\r"), None);
    }

    #[test]
    fn test_literal_length() {
        assert_eq!(literal_length(b"* 1 FETCH (BODY[1] {42}\r\n"), Some(42));
        assert_eq!(literal_length(b"* 1 FETCH (BODY[1] {42+}\r\n"), Some(42));
        assert_eq!(literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(literal_length(b"no literal here\r\n"), None);
        assert_eq!(literal_length(b"unterminated {42"), None);
        assert_eq!(literal_length(b"not a number {x}\r\n"), None);
        assert_eq!(literal_length(b"empty {}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_single_line() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut framed = FramedStream::new(mock);
        let response = framed.read_response().await.unwrap();
        assert_eq!(&response[..], b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_inlines_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[1] {5}\r\n")
            .read(b"hello)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let response = framed.read_response().await.unwrap();
        assert_eq!(&response[..], b"* 1 FETCH (BODY[1] {5}\r\nhello)\r\n");
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads() {
        let mock = Builder::new().read(b"* OK ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);
        let response = framed.read_response().await.unwrap();
        assert_eq!(&response[..], b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_until_tagged_collects_untagged() {
        let mock = Builder::new()
            .read(b"* 3 EXISTS\r\n")
            .read(b"* 1 RECENT\r\n")
            .read(b"W0000 OK SELECT completed\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let responses = framed.read_until_tagged("W0000").await.unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(&responses[2][..], b"W0000 OK SELECT completed\r\n");
    }

    #[tokio::test]
    async fn test_tag_prefix_must_be_whole_token() {
        // W00001 is a different tag; reading must continue to W0000
        let mock = Builder::new()
            .read(b"W00001 OK other\r\n")
            .read(b"W0000 OK done\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let responses = framed.read_until_tagged("W0000").await.unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_literal_rejected() {
        let header = format!("* 1 FETCH (BODY[1] {{{}}}\r\n", MAX_LITERAL_LEN + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("byte cap"));
    }

    #[tokio::test]
    async fn test_overlong_line_rejected() {
        let long = vec![b'A'; MAX_LINE_LEN + 100];
        let mock = Builder::new().read(&long).build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"W0000 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);
        framed.write_command(b"W0000 NOOP\r\n").await.unwrap();
    }
}
