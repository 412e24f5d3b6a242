//! FETCH response data parsing: envelopes, body structures, section content.

use crate::parser::lexer::{Lexer, Token};
use crate::parser::{Address, BodyStructure, Envelope, FetchItem};
use crate::types::{Flag, Uid};
use crate::{Error, Result};

/// Parses the parenthesized item list of a `* n FETCH (...)` response.
pub fn parse_fetch_items(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect_open()?;

    let mut items = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::Close => break,
            Token::Space => {}
            Token::Atom(name) => {
                let upper = name.to_ascii_uppercase();
                match upper.as_str() {
                    "UID" => {
                        lexer.expect_space()?;
                        let n = lexer.read_number()?;
                        let uid = Uid::new(n).ok_or_else(|| Error::Parse {
                            position: lexer.position(),
                            message: "UID cannot be 0".to_string(),
                        })?;
                        items.push(FetchItem::Uid(uid));
                    }
                    "FLAGS" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::Flags(parse_flag_list(lexer)?));
                    }
                    "INTERNALDATE" => {
                        lexer.expect_space()?;
                        if let Token::Quoted(date) = lexer.next_token()? {
                            items.push(FetchItem::InternalDate(date));
                        }
                    }
                    "RFC822.SIZE" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::Rfc822Size(lexer.read_number()?));
                    }
                    "ENVELOPE" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::Envelope(Box::new(parse_envelope(lexer)?)));
                    }
                    "BODYSTRUCTURE" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::BodyStructure(parse_body_structure(lexer)?));
                    }
                    "BODY" => {
                        let section = parse_body_section(lexer)?;
                        skip_partial_origin(lexer);
                        lexer.expect_space()?;
                        let data = match lexer.next_token()? {
                            Token::Literal(d) => Some(d),
                            Token::Quoted(s) => Some(s.into_bytes()),
                            _ => None,
                        };
                        items.push(FetchItem::Body { section, data });
                    }
                    _ => skip_item_value(lexer),
                }
            }
            Token::Eof => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: "unterminated FETCH item list".to_string(),
                });
            }
            _ => {}
        }
    }

    Ok(items)
}

/// Parses a parenthesized flag list.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Vec<Flag>> {
    lexer.expect_open()?;
    let mut flags = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::Close => break,
            Token::Space => {}
            Token::Atom(s) => flags.push(Flag::parse(s)),
            t => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("unexpected token in flag list: {t:?}"),
                });
            }
        }
    }
    Ok(flags)
}

/// Parses the `[section]` suffix of a BODY response item.
fn parse_body_section(lexer: &mut Lexer<'_>) -> Result<Option<String>> {
    if lexer.peek() != Some(b'[') {
        return Ok(None);
    }
    lexer.skip(1);
    let mut section = String::new();
    loop {
        match lexer.peek() {
            Some(b']') => {
                lexer.skip(1);
                break;
            }
            Some(b) => {
                section.push(b as char);
                lexer.skip(1);
            }
            None => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: "unterminated body section".to_string(),
                });
            }
        }
    }
    Ok((!section.is_empty()).then_some(section))
}

/// Skips the `<origin>` marker of a partial fetch response, if present.
fn skip_partial_origin(lexer: &mut Lexer<'_>) {
    if lexer.peek() != Some(b'<') {
        return;
    }
    lexer.skip(1);
    while let Some(b) = lexer.peek() {
        lexer.skip(1);
        if b == b'>' {
            break;
        }
    }
}

/// Parses an ENVELOPE structure.
pub fn parse_envelope(lexer: &mut Lexer<'_>) -> Result<Envelope> {
    lexer.expect_open()?;

    let date = lexer.read_nstring()?;
    lexer.expect_space()?;
    let subject = lexer.read_nstring()?;
    lexer.expect_space()?;
    let from = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let sender = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let reply_to = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let to = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let cc = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let bcc = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let in_reply_to = lexer.read_nstring()?;
    lexer.expect_space()?;
    let message_id = lexer.read_nstring()?;

    lexer.expect_close()?;

    Ok(Envelope {
        date,
        subject,
        from,
        sender,
        reply_to,
        to,
        cc,
        bcc,
        in_reply_to,
        message_id,
    })
}

fn parse_address_list(lexer: &mut Lexer<'_>) -> Result<Vec<Address>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::Open => {
            let mut addresses = Vec::new();
            loop {
                match lexer.peek() {
                    Some(b')') => {
                        lexer.skip(1);
                        break;
                    }
                    Some(b'(') => addresses.push(parse_address(lexer)?),
                    Some(b' ') => lexer.skip(1),
                    _ => break,
                }
            }
            Ok(addresses)
        }
        t => Err(Error::Parse {
            position: lexer.position(),
            message: format!("expected address list, got {t:?}"),
        }),
    }
}

fn parse_address(lexer: &mut Lexer<'_>) -> Result<Address> {
    lexer.expect_open()?;
    let name = lexer.read_nstring()?;
    lexer.expect_space()?;
    let route = lexer.read_nstring()?;
    lexer.expect_space()?;
    let mailbox = lexer.read_nstring()?;
    lexer.expect_space()?;
    let host = lexer.read_nstring()?;
    lexer.expect_close()?;
    Ok(Address {
        name,
        route,
        mailbox,
        host,
    })
}

/// Parses a BODYSTRUCTURE tree.
///
/// Multiparts open with a nested paren; leaf parts open with the media type
/// string. Extension fields (MD5, disposition, language, location) are
/// skipped.
pub fn parse_body_structure(lexer: &mut Lexer<'_>) -> Result<BodyStructure> {
    lexer.expect_open()?;

    if lexer.peek() == Some(b'(') {
        let mut parts = Vec::new();
        while lexer.peek() == Some(b'(') {
            parts.push(parse_body_structure(lexer)?);
            if lexer.peek() == Some(b' ') {
                lexer.skip(1);
            }
        }
        let subtype = lexer
            .read_nstring()?
            .unwrap_or_default()
            .to_ascii_uppercase();
        skip_to_close(lexer);
        return Ok(BodyStructure::Multipart { parts, subtype });
    }

    let media_type = lexer
        .read_nstring()?
        .unwrap_or_default()
        .to_ascii_uppercase();
    lexer.expect_space()?;
    let media_subtype = lexer
        .read_nstring()?
        .unwrap_or_default()
        .to_ascii_uppercase();
    lexer.expect_space()?;
    let params = parse_part_params(lexer)?;
    lexer.expect_space()?;
    let id = lexer.read_nstring()?;
    lexer.expect_space()?;
    let description = lexer.read_nstring()?;
    lexer.expect_space()?;
    let encoding = lexer.read_nstring()?.unwrap_or_default();
    lexer.expect_space()?;
    let size = lexer.read_number()?;
    skip_to_close(lexer);

    Ok(BodyStructure::Part {
        media_type,
        media_subtype,
        params,
        id,
        description,
        encoding,
        size,
    })
}

fn parse_part_params(lexer: &mut Lexer<'_>) -> Result<Vec<(String, String)>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::Open => {
            let mut params = Vec::new();
            loop {
                match lexer.peek() {
                    Some(b')') => {
                        lexer.skip(1);
                        break;
                    }
                    Some(b' ') => lexer.skip(1),
                    _ => {
                        let key = lexer.read_nstring()?.unwrap_or_default();
                        if lexer.peek() == Some(b' ') {
                            lexer.skip(1);
                        }
                        let value = lexer.read_nstring()?.unwrap_or_default();
                        params.push((key, value));
                    }
                }
            }
            Ok(params)
        }
        _ => Ok(Vec::new()),
    }
}

/// Skips everything up to and including the `)` closing the current level.
fn skip_to_close(lexer: &mut Lexer<'_>) {
    let mut depth = 1;
    while depth > 0 {
        match lexer.peek() {
            Some(b'(') => {
                depth += 1;
                lexer.skip(1);
            }
            Some(b')') => {
                depth -= 1;
                lexer.skip(1);
            }
            Some(b'{') => {
                // Inline literal inside an extension field
                let _ = lexer.next_token();
            }
            Some(_) => lexer.skip(1),
            None => break,
        }
    }
}

/// Skips the value of an unrecognized fetch item.
fn skip_item_value(lexer: &mut Lexer<'_>) {
    if lexer.peek() == Some(b' ') {
        lexer.skip(1);
    }
    let mut depth = 0u32;
    loop {
        match lexer.peek() {
            Some(b'(') => {
                depth += 1;
                lexer.skip(1);
            }
            Some(b')') => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                lexer.skip(1);
            }
            Some(b' ') if depth == 0 => break,
            Some(b'{') => {
                let _ = lexer.next_token();
            }
            Some(_) => lexer.skip(1),
            None => break,
        }
    }
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
    fn test_uid_and_flags() {
        let mut lexer = Lexer::new(b"(UID 123 FLAGS (\\Seen))");
        let items = parse_fetch_items(&mut lexer).unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], FetchItem::Uid(u) if u.get() == 123));
        assert!(matches!(&items[1], FetchItem::Flags(f) if f.contains(&Flag::Seen)));
    }

    #[test]
    fn test_uid_zero_rejected() {
        let mut lexer = Lexer::new(b"(UID 0)");
        assert!(parse_fetch_items(&mut lexer).is_err());
    }

    #[test]
    fn test_body_with_literal() {
        let mut lexer = Lexer::new(b"(UID 7 BODY[1] {5}\r\nhello)");
        let items = parse_fetch_items(&mut lexer).unwrap();
        match &items[1] {
            FetchItem::Body { section, data } => {
                assert_eq!(section.as_deref(), Some("1"));
                assert_eq!(data.as_deref(), Some(b"hello".as_slice()));
            }
            other => panic!("expected body item, got {other:?}"),
        }
    }

    #[test]
    fn test_body_with_partial_origin() {
        let mut lexer = Lexer::new(b"(BODY[TEXT]<0> {2}\r\nhi)");
        let items = parse_fetch_items(&mut lexer).unwrap();
        match &items[0] {
            FetchItem::Body { section, data } => {
                assert_eq!(section.as_deref(), Some("TEXT"));
                assert_eq!(data.as_deref(), Some(b"hi".as_slice()));
            }
            other => panic!("expected body item, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_fields() {
        let raw = b"(ENVELOPE (\"Mon, 1 Jan 2024 09:30:00 +0000\" \"Quarterly numbers\" \
((\"Ana\" NIL \"ana\" \"example.com\")) NIL NIL ((NIL NIL \"team\" \"example.com\")) \
NIL NIL NIL \"<m1@example.com>\"))";
        let mut lexer = Lexer::new(raw);
        let items = parse_fetch_items(&mut lexer).unwrap();
        match &items[0] {
            FetchItem::Envelope(env) => {
                assert_eq!(env.subject.as_deref(), Some("Quarterly numbers"));
                assert_eq!(env.from.len(), 1);
                assert_eq!(env.from[0].email(), Some("ana@example.com".to_string()));
                assert_eq!(env.message_id.as_deref(), Some("<m1@example.com>"));
            }
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_body_structure() {
        let mut lexer =
            Lexer::new(b"(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" 42 3)");
        let bs = parse_body_structure(&mut lexer).unwrap();
        match bs {
            BodyStructure::Part {
                media_type,
                media_subtype,
                params,
                size,
                ..
            } => {
                assert_eq!(media_type, "TEXT");
                assert_eq!(media_subtype, "PLAIN");
                assert_eq!(params, vec![("CHARSET".to_string(), "UTF-8".to_string())]);
                assert_eq!(size, 42);
            }
            other => panic!("expected part, got {other:?}"),
        }
    }

    #[test]
    fn test_multipart_body_structure() {
        let raw = b"((\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1)(\"IMAGE\" \"PNG\" \
(\"NAME\" \"cat.png\") NIL NIL \"BASE64\" 9000) \"MIXED\")";
        let mut lexer = Lexer::new(raw);
        let bs = parse_body_structure(&mut lexer).unwrap();
        match bs {
            BodyStructure::Multipart { parts, subtype } => {
                assert_eq!(subtype, "MIXED");
                assert_eq!(parts.len(), 2);
                assert!(matches!(
                    &parts[1],
                    BodyStructure::Part { media_type, .. } if media_type == "IMAGE"
                ));
            }
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_item_is_skipped() {
        let mut lexer = Lexer::new(b"(X-GM-LABELS (\"\\\\Inbox\") UID 4)");
        let items = parse_fetch_items(&mut lexer).unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], FetchItem::Uid(u) if u.get() == 4));
    }
}
