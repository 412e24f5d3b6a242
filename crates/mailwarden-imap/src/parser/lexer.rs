//! Tokenizer for server response lines.
//!
//! Splits a raw response (one logical line, literals already inlined by the
//! framing layer) into the tokens of the RFC 9051 grammar.

use crate::{Error, Result};

/// A lexed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// `*` untagged marker.
    Asterisk,
    /// `+` continuation marker.
    Plus,
    /// Bare atom, e.g. `OK`, `FETCH`, `\Seen`.
    Atom(&'a str),
    /// Unsigned number.
    Number(u32),
    /// Double-quoted string, unescaped.
    Quoted(String),
    /// `{n}` literal payload.
    Literal(Vec<u8>),
    /// `NIL`.
    Nil,
    /// `(`.
    Open,
    /// `)`.
    Close,
    /// `[`.
    OpenBracket,
    /// `]`.
    CloseBracket,
    /// Single space.
    Space,
    /// Line terminator.
    Crlf,
    /// End of input.
    Eof,
}

/// Cursor over one response line.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over the given line.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Current byte offset, for error reporting.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Consumes and returns the current byte.
    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Skips `n` bytes, clamped to the end of input.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Returns the unread remainder of the line.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(b) = self.peek() else {
            return Ok(Token::Eof);
        };

        match b {
            b'\r' => {
                if self.rest().starts_with(b"\r\n") {
                    self.skip(2);
                    Ok(Token::Crlf)
                } else {
                    Err(self.fail("expected LF after CR"))
                }
            }
            b' ' => {
                self.skip(1);
                Ok(Token::Space)
            }
            b'(' => {
                self.skip(1);
                Ok(Token::Open)
            }
            b')' => {
                self.skip(1);
                Ok(Token::Close)
            }
            b'[' => {
                self.skip(1);
                Ok(Token::OpenBracket)
            }
            b']' => {
                self.skip(1);
                Ok(Token::CloseBracket)
            }
            b'*' => {
                self.skip(1);
                Ok(Token::Asterisk)
            }
            b'+' => {
                self.skip(1);
                Ok(Token::Plus)
            }
            b'"' => self.lex_quoted(),
            b'{' => self.lex_literal(),
            _ if is_atom_byte(b) => self.lex_atom(),
            _ => Err(self.fail(&format!("unexpected byte {b:#04x}"))),
        }
    }

    fn lex_quoted(&mut self) -> Result<Token<'a>> {
        self.skip(1);
        let mut out = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(c @ (b'"' | b'\\')) => out.push(c),
                    Some(c) => return Err(self.fail(&format!("invalid escape \\{}", c as char))),
                    None => return Err(self.fail("unterminated quoted string")),
                },
                Some(c) => out.push(c),
                None => return Err(self.fail("unterminated quoted string")),
            }
        }
        let s = String::from_utf8(out).map_err(|_| self.fail("quoted string is not UTF-8"))?;
        Ok(Token::Quoted(s))
    }

    fn lex_literal(&mut self) -> Result<Token<'a>> {
        self.skip(1);
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.skip(1);
        }
        // Non-synchronizing literals carry a '+' before the brace
        if self.peek() == Some(b'+') {
            self.skip(1);
        }
        let digits = &self.input[start..self.pos];
        let digits = if digits.ends_with(b"+") {
            &digits[..digits.len() - 1]
        } else {
            digits
        };
        let size: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.fail("invalid literal size"))?;
        if self.bump() != Some(b'}') {
            return Err(self.fail("expected } after literal size"));
        }
        if self.rest().starts_with(b"\r\n") {
            self.skip(2);
        }
        if self.pos + size > self.input.len() {
            return Err(self.fail("literal data truncated"));
        }
        let data = self.input[self.pos..self.pos + size].to_vec();
        self.skip(size);
        Ok(Token::Literal(data))
    }

    fn lex_atom(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        let mut all_digits = true;
        while let Some(b) = self.peek() {
            if !is_atom_byte(b) {
                break;
            }
            if !b.is_ascii_digit() {
                all_digits = false;
            }
            self.skip(1);
        }
        let s = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.fail("atom is not UTF-8"))?;

        if all_digits {
            let n: u32 = s.parse().map_err(|_| self.fail("number too large"))?;
            return Ok(Token::Number(n));
        }
        if s.eq_ignore_ascii_case("NIL") {
            return Ok(Token::Nil);
        }
        Ok(Token::Atom(s))
    }

    /// Consumes a single space or fails.
    pub fn expect_space(&mut self) -> Result<()> {
        match self.next_token()? {
            Token::Space => Ok(()),
            t => Err(self.fail(&format!("expected space, got {t:?}"))),
        }
    }

    /// Consumes `(` or fails.
    pub fn expect_open(&mut self) -> Result<()> {
        match self.next_token()? {
            Token::Open => Ok(()),
            t => Err(self.fail(&format!("expected (, got {t:?}"))),
        }
    }

    /// Consumes `)` or fails.
    pub fn expect_close(&mut self) -> Result<()> {
        match self.next_token()? {
            Token::Close => Ok(()),
            t => Err(self.fail(&format!("expected ), got {t:?}"))),
        }
    }

    /// Reads an atom and returns it, or fails.
    pub fn read_atom(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            t => Err(self.fail(&format!("expected atom, got {t:?}"))),
        }
    }

    /// Reads a number, or fails.
    pub fn read_number(&mut self) -> Result<u32> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            t => Err(self.fail(&format!("expected number, got {t:?}"))),
        }
    }

    /// Reads an astring: atom, quoted string, or literal.
    pub fn read_string(&mut self) -> Result<String> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Quoted(s) => Ok(s),
            Token::Literal(data) => {
                String::from_utf8(data).map_err(|_| self.fail("literal is not UTF-8"))
            }
            t => Err(self.fail(&format!("expected string, got {t:?}"))),
        }
    }

    /// Reads an nstring: NIL or a string.
    pub fn read_nstring(&mut self) -> Result<Option<String>> {
        match self.next_token()? {
            Token::Nil => Ok(None),
            Token::Quoted(s) => Ok(Some(s)),
            Token::Literal(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            t => Err(self.fail(&format!("expected nstring, got {t:?}"))),
        }
    }

    /// Consumes the rest of the line (up to CRLF) as text.
    pub fn read_line_text(&mut self) -> String {
        let rest = self.rest();
        let end = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(rest.len());
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.skip(end);
        if self.rest().starts_with(b"\r\n") {
            self.skip(2);
        }
        text
    }

    fn fail(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }
}

/// Returns true for bytes that may appear in an atom.
///
/// `\` is included so flags like `\Seen` lex as one token, although the RFC
/// formally treats it as a quoted-special.
#[must_use]
pub const fn is_atom_byte(b: u8) -> bool {
    matches!(b,
        0x21 | 0x23 | 0x24 | 0x26 | 0x27 |
        0x2B..=0x5A |
        0x5C |
        0x5E..=0x7A |
        0x7C |
        0x7E
    )
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
    fn test_untagged_line() {
        let mut lexer = Lexer::new(b"* OK ready\r\n");
        assert_eq!(lexer.next_token().unwrap(), Token::Asterisk);
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("OK"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("ready"));
        assert_eq!(lexer.next_token().unwrap(), Token::Crlf);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_numbers_and_atoms() {
        let mut lexer = Lexer::new(b"23 EXISTS");
        assert_eq!(lexer.next_token().unwrap(), Token::Number(23));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("EXISTS"));
    }

    #[test]
    fn test_quoted_with_escapes() {
        let mut lexer = Lexer::new(b"\"he said \\\"hi\\\"\"");
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::Quoted("he said \"hi\"".to_string())
        );
    }

    #[test]
    fn test_literal_payload() {
        let mut lexer = Lexer::new(b"{5}\r\nhello rest");
        match lexer.next_token().unwrap() {
            Token::Literal(data) => assert_eq!(data, b"hello"),
            other => panic!("expected literal, got {other:?}"),
        }
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("rest"));
    }

    #[test]
    fn test_non_sync_literal() {
        let mut lexer = Lexer::new(b"{3+}\r\nabc");
        match lexer.next_token().unwrap() {
            Token::Literal(data) => assert_eq!(data, b"abc"),
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_literal_fails() {
        let mut lexer = Lexer::new(b"{10}\r\nshort");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_nil_case_insensitive() {
        let mut lexer = Lexer::new(b"NIL nil");
        assert_eq!(lexer.next_token().unwrap(), Token::Nil);
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Nil);
    }

    #[test]
    fn test_flag_atom() {
        let mut lexer = Lexer::new(b"(\\Seen)");
        assert_eq!(lexer.next_token().unwrap(), Token::Open);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("\\Seen"));
        assert_eq!(lexer.next_token().unwrap(), Token::Close);
    }

    #[test]
    fn test_brackets() {
        let mut lexer = Lexer::new(b"[UIDNEXT 4392]");
        assert_eq!(lexer.next_token().unwrap(), Token::OpenBracket);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("UIDNEXT"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Number(4392));
        assert_eq!(lexer.next_token().unwrap(), Token::CloseBracket);
    }

    #[test]
    fn test_read_line_text() {
        let mut lexer = Lexer::new(b"some trailing text\r\n");
        assert_eq!(lexer.read_line_text(), "some trailing text");
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_is_atom_byte() {
        assert!(is_atom_byte(b'A'));
        assert!(is_atom_byte(b'9'));
        assert!(is_atom_byte(b'\\'));
        assert!(is_atom_byte(b'.'));
        assert!(!is_atom_byte(b' '));
        assert!(!is_atom_byte(b'('));
        assert!(!is_atom_byte(b'"'));
        assert!(!is_atom_byte(b'%'));
        assert!(!is_atom_byte(b'*'));
        assert!(!is_atom_byte(b']'));
    }
}
