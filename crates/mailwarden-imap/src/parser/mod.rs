//! Server response grammar.
//!
//! A response line is either tagged (`W0003 OK ...`), untagged (`* 12 EXISTS`,
//! `* SEARCH 4 7`), or a continuation request (`+ ...`). The parser consumes
//! one complete line at a time, literals already inlined by the framing layer.

pub mod fetch;
pub mod lexer;

use crate::parser::lexer::{Lexer, Token};
use crate::types::{Flag, ResponseCode, SeqNum, Status, Uid, UidValidity};
use crate::{Error, Result};

/// One complete server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Completion result for a client command.
    Tagged {
        /// Tag echoed from the command.
        tag: String,
        /// OK, NO, or BAD.
        status: Status,
        /// Optional bracketed response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Server data or status not tied to a command.
    Untagged(UntaggedResponse),
    /// Continuation request for literal transmission.
    Continuation,
}

/// Untagged response payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum UntaggedResponse {
    /// `* OK [code] text`, including the greeting.
    Ok {
        /// Optional bracketed response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* NO [code] text`.
    No {
        /// Optional bracketed response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* BAD [code] text`.
    Bad {
        /// Optional bracketed response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* PREAUTH text`: connection greeted already authenticated.
    PreAuth {
        /// Human-readable text.
        text: String,
    },
    /// `* BYE text`: server is closing the connection.
    Bye {
        /// Human-readable text.
        text: String,
    },
    /// `* CAPABILITY ...`.
    Capability(Vec<String>),
    /// `* FLAGS (...)`.
    Flags(Vec<Flag>),
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n EXPUNGE`.
    Expunge(SeqNum),
    /// `* SEARCH n n n`: raw numbers, UIDs when the search was `UID SEARCH`.
    Search(Vec<u32>),
    /// `* STATUS mailbox (...)`.
    Status {
        /// Mailbox the status describes.
        mailbox: String,
        /// Attribute name/value pairs.
        items: Vec<(String, u32)>,
    },
    /// `* n FETCH (...)`.
    Fetch {
        /// Message sequence number.
        seq: SeqNum,
        /// Parsed data items.
        items: Vec<FetchItem>,
    },
}

/// One data item inside a FETCH response.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchItem {
    /// Unique identifier.
    Uid(Uid),
    /// Message envelope.
    Envelope(Box<Envelope>),
    /// Server arrival timestamp, verbatim.
    InternalDate(String),
    /// Full message size in octets.
    Rfc822Size(u32),
    /// MIME structure tree.
    BodyStructure(BodyStructure),
    /// Content of one body section.
    Body {
        /// Section path requested, e.g. `1.2` or `TEXT`.
        section: Option<String>,
        /// Raw section bytes, still transfer-encoded.
        data: Option<Vec<u8>>,
    },
    /// Message flags.
    Flags(Vec<Flag>),
}

/// Parsed ENVELOPE structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    /// Date header, verbatim.
    pub date: Option<String>,
    /// Subject header.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Vec<Address>,
    /// Sender addresses.
    pub sender: Vec<Address>,
    /// Reply-To addresses.
    pub reply_to: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// Bcc addresses.
    pub bcc: Vec<Address>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

/// One address from an envelope address list.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Source route, rarely present.
    pub route: Option<String>,
    /// Local part.
    pub mailbox: Option<String>,
    /// Domain part.
    pub host: Option<String>,
}

impl Address {
    /// Joins mailbox and host into `local@domain` when both are present.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => Some(format!("{m}@{h}")),
            _ => None,
        }
    }
}

/// MIME structure of a message as reported by BODYSTRUCTURE.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyStructure {
    /// Leaf part.
    Part {
        /// Media type, uppercased, e.g. `TEXT` or `IMAGE`.
        media_type: String,
        /// Media subtype, uppercased, e.g. `PLAIN` or `PNG`.
        media_subtype: String,
        /// Body parameters such as charset and name.
        params: Vec<(String, String)>,
        /// Content-ID.
        id: Option<String>,
        /// Content-Description.
        description: Option<String>,
        /// Content transfer encoding, e.g. `BASE64`.
        encoding: String,
        /// Part size in octets.
        size: u32,
    },
    /// Composite part with numbered children.
    Multipart {
        /// Child parts, in section-number order.
        parts: Vec<BodyStructure>,
        /// Multipart subtype, uppercased, e.g. `MIXED`.
        subtype: String,
    },
}

impl BodyStructure {
    /// Reports whether this is a leaf of the given media type.
    #[must_use]
    pub fn is_media(&self, wanted_type: &str, wanted_subtype: Option<&str>) -> bool {
        match self {
            Self::Part {
                media_type,
                media_subtype,
                ..
            } => {
                media_type.eq_ignore_ascii_case(wanted_type)
                    && wanted_subtype.is_none_or(|s| media_subtype.eq_ignore_ascii_case(s))
            }
            Self::Multipart { .. } => false,
        }
    }

    /// Walks the tree yielding (dotted section path, leaf part) pairs.
    ///
    /// A non-multipart message maps to the single section `1`. Children of
    /// a multipart are numbered from 1 and nested paths are dot-joined.
    pub fn walk_leaves(&self) -> Vec<(String, &BodyStructure)> {
        fn recurse<'a>(
            node: &'a BodyStructure,
            path: String,
            out: &mut Vec<(String, &'a BodyStructure)>,
        ) {
            match node {
                BodyStructure::Part { .. } => out.push((path, node)),
                BodyStructure::Multipart { parts, .. } => {
                    for (i, child) in parts.iter().enumerate() {
                        let child_path = if path.is_empty() {
                            (i + 1).to_string()
                        } else {
                            format!("{path}.{}", i + 1)
                        };
                        recurse(child, child_path, out);
                    }
                }
            }
        }

        let mut out = Vec::new();
        match self {
            Self::Part { .. } => out.push(("1".to_string(), self)),
            Self::Multipart { .. } => recurse(self, String::new(), &mut out),
        }
        out
    }
}

/// Parses complete response lines.
#[derive(Debug)]
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one complete response line, including its trailing CRLF.
    pub fn parse(line: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(line);
        match lexer.next_token()? {
            Token::Asterisk => {
                lexer.expect_space()?;
                Ok(Response::Untagged(parse_untagged(&mut lexer)?))
            }
            Token::Plus => Ok(Response::Continuation),
            Token::Atom(tag) => {
                let tag = tag.to_string();
                lexer.expect_space()?;
                let status_atom = lexer.read_atom()?;
                let status = parse_status(status_atom, lexer.position())?;
                let (code, text) = parse_code_and_text(&mut lexer)?;
                Ok(Response::Tagged {
                    tag,
                    status,
                    code,
                    text,
                })
            }
            t => Err(Error::Parse {
                position: lexer.position(),
                message: format!("unexpected start of response: {t:?}"),
            }),
        }
    }
}

fn parse_status(atom: &str, position: usize) -> Result<Status> {
    match atom.to_ascii_uppercase().as_str() {
        "OK" => Ok(Status::Ok),
        "NO" => Ok(Status::No),
        "BAD" => Ok(Status::Bad),
        "PREAUTH" => Ok(Status::PreAuth),
        "BYE" => Ok(Status::Bye),
        other => Err(Error::Parse {
            position,
            message: format!("unknown response status: {other}"),
        }),
    }
}

fn parse_untagged(lexer: &mut Lexer<'_>) -> Result<UntaggedResponse> {
    // Numeric-first forms: EXISTS, RECENT, EXPUNGE, FETCH
    if lexer.peek().is_some_and(|b| b.is_ascii_digit()) {
        let n = lexer.read_number()?;
        lexer.expect_space()?;
        let keyword = lexer.read_atom()?.to_ascii_uppercase();
        return match keyword.as_str() {
            "EXISTS" => Ok(UntaggedResponse::Exists(n)),
            "RECENT" => Ok(UntaggedResponse::Recent(n)),
            "EXPUNGE" => {
                let seq = SeqNum::new(n).ok_or_else(|| Error::Parse {
                    position: lexer.position(),
                    message: "sequence number cannot be 0".to_string(),
                })?;
                Ok(UntaggedResponse::Expunge(seq))
            }
            "FETCH" => {
                let seq = SeqNum::new(n).ok_or_else(|| Error::Parse {
                    position: lexer.position(),
                    message: "sequence number cannot be 0".to_string(),
                })?;
                lexer.expect_space()?;
                let items = fetch::parse_fetch_items(lexer)?;
                Ok(UntaggedResponse::Fetch { seq, items })
            }
            other => Err(Error::Parse {
                position: lexer.position(),
                message: format!("unknown numeric response: {other}"),
            }),
        };
    }

    let keyword = lexer.read_atom()?.to_ascii_uppercase();
    match keyword.as_str() {
        "OK" => {
            let (code, text) = parse_code_and_text(lexer)?;
            Ok(UntaggedResponse::Ok { code, text })
        }
        "NO" => {
            let (code, text) = parse_code_and_text(lexer)?;
            Ok(UntaggedResponse::No { code, text })
        }
        "BAD" => {
            let (code, text) = parse_code_and_text(lexer)?;
            Ok(UntaggedResponse::Bad { code, text })
        }
        "PREAUTH" => {
            let (_, text) = parse_code_and_text(lexer)?;
            Ok(UntaggedResponse::PreAuth { text })
        }
        "BYE" => {
            let (_, text) = parse_code_and_text(lexer)?;
            Ok(UntaggedResponse::Bye { text })
        }
        "CAPABILITY" => {
            let mut caps = Vec::new();
            loop {
                match lexer.next_token()? {
                    Token::Space => {}
                    Token::Atom(c) => caps.push(c.to_string()),
                    Token::Crlf | Token::Eof => break,
                    _ => {}
                }
            }
            Ok(UntaggedResponse::Capability(caps))
        }
        "FLAGS" => {
            lexer.expect_space()?;
            Ok(UntaggedResponse::Flags(fetch::parse_flag_list(lexer)?))
        }
        "SEARCH" => {
            let mut hits = Vec::new();
            loop {
                match lexer.next_token()? {
                    Token::Space => {}
                    Token::Number(n) => hits.push(n),
                    Token::Crlf | Token::Eof => break,
                    t => {
                        return Err(Error::Parse {
                            position: lexer.position(),
                            message: format!("unexpected token in search response: {t:?}"),
                        });
                    }
                }
            }
            Ok(UntaggedResponse::Search(hits))
        }
        "STATUS" => {
            lexer.expect_space()?;
            let mailbox = lexer.read_string()?;
            lexer.expect_space()?;
            lexer.expect_open()?;
            let mut items = Vec::new();
            loop {
                match lexer.next_token()? {
                    Token::Close => break,
                    Token::Space => {}
                    Token::Atom(name) => {
                        let name = name.to_ascii_uppercase();
                        lexer.expect_space()?;
                        items.push((name, lexer.read_number()?));
                    }
                    t => {
                        return Err(Error::Parse {
                            position: lexer.position(),
                            message: format!("unexpected token in status items: {t:?}"),
                        });
                    }
                }
            }
            Ok(UntaggedResponse::Status { mailbox, items })
        }
        other => Err(Error::Parse {
            position: lexer.position(),
            message: format!("unknown untagged response: {other}"),
        }),
    }
}

/// Parses an optional `[response-code]` followed by the rest-of-line text.
fn parse_code_and_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
    if lexer.peek() == Some(b' ') {
        lexer.skip(1);
    }

    let code = if lexer.peek() == Some(b'[') {
        lexer.skip(1);
        let code = parse_response_code(lexer)?;
        if lexer.peek() == Some(b' ') {
            lexer.skip(1);
        }
        Some(code)
    } else {
        None
    };

    let text = lexer.read_line_text();
    Ok((code, text))
}

fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    let name = lexer.read_atom()?.to_ascii_uppercase();
    let code = match name.as_str() {
        "ALERT" => ResponseCode::Alert,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "AUTHENTICATIONFAILED" => ResponseCode::AuthenticationFailed,
        "NONEXISTENT" => ResponseCode::Nonexistent,
        "UIDNEXT" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            let uid = Uid::new(n).ok_or_else(|| Error::Parse {
                position: lexer.position(),
                message: "UIDNEXT cannot be 0".to_string(),
            })?;
            ResponseCode::UidNext(uid)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            let v = UidValidity::new(n).ok_or_else(|| Error::Parse {
                position: lexer.position(),
                message: "UIDVALIDITY cannot be 0".to_string(),
            })?;
            ResponseCode::UidValidity(v)
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            let seq = SeqNum::new(n).ok_or_else(|| Error::Parse {
                position: lexer.position(),
                message: "UNSEEN cannot be 0".to_string(),
            })?;
            ResponseCode::Unseen(seq)
        }
        other => {
            // Unknown codes keep their raw text through the closing bracket
            let mut raw = other.to_string();
            while let Some(b) = lexer.peek() {
                if b == b']' {
                    break;
                }
                raw.push(b as char);
                lexer.skip(1);
            }
            lexer.skip(1);
            return Ok(ResponseCode::Unknown(raw));
        }
    };

    if lexer.peek() == Some(b']') {
        lexer.skip(1);
    }
    Ok(code)
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

    fn parse(line: &[u8]) -> Response {
        ResponseParser::parse(line).unwrap()
    }

    #[test]
    fn test_greeting() {
        let r = parse(b"* OK Dovecot ready.\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Ok {
                code: None,
                text: "Dovecot ready.".to_string(),
            })
        );
    }

    #[test]
    fn test_tagged_ok() {
        let r = parse(b"W0001 OK LOGIN completed\r\n");
        match r {
            Response::Tagged {
                tag, status, code, ..
            } => {
                assert_eq!(tag, "W0001");
                assert_eq!(status, Status::Ok);
                assert_eq!(code, None);
            }
            other => panic!("expected tagged, got {other:?}"),
        }
    }

    #[test]
    fn test_tagged_no_with_auth_code() {
        let r = parse(b"W0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n");
        match r {
            Response::Tagged {
                status, code, text, ..
            } => {
                assert_eq!(status, Status::No);
                assert_eq!(code, Some(ResponseCode::AuthenticationFailed));
                assert_eq!(text, "Invalid credentials");
            }
            other => panic!("expected tagged, got {other:?}"),
        }
    }

    #[test]
    fn test_exists_and_recent() {
        assert_eq!(
            parse(b"* 23 EXISTS\r\n"),
            Response::Untagged(UntaggedResponse::Exists(23))
        );
        assert_eq!(
            parse(b"* 1 RECENT\r\n"),
            Response::Untagged(UntaggedResponse::Recent(1))
        );
    }

    #[test]
    fn test_search_results() {
        assert_eq!(
            parse(b"* SEARCH 4 8 15 16\r\n"),
            Response::Untagged(UntaggedResponse::Search(vec![4, 8, 15, 16]))
        );
        assert_eq!(
            parse(b"* SEARCH\r\n"),
            Response::Untagged(UntaggedResponse::Search(Vec::new()))
        );
    }

    #[test]
    fn test_select_response_codes() {
        let r = parse(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Ok {
                code: Some(ResponseCode::UidValidity(
                    UidValidity::new(3857529045).unwrap()
                )),
                text: "UIDs valid".to_string(),
            })
        );

        let r = parse(b"* OK [UIDNEXT 4392] Predicted next UID\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Ok {
                code: Some(ResponseCode::UidNext(Uid::new(4392).unwrap())),
                text: "Predicted next UID".to_string(),
            })
        );

        let r = parse(b"* OK [UNSEEN 12] Message 12 is first unseen\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Ok {
                code: Some(ResponseCode::Unseen(SeqNum::new(12).unwrap())),
                text: "Message 12 is first unseen".to_string(),
            })
        );
    }

    #[test]
    fn test_nonexistent_code() {
        let r = parse(b"W0002 NO [NONEXISTENT] Unknown Mailbox: Archive\r\n");
        match r {
            Response::Tagged { code, .. } => {
                assert_eq!(code, Some(ResponseCode::Nonexistent));
            }
            other => panic!("expected tagged, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_code_preserved() {
        let r = parse(b"* OK [PERMANENTFLAGS (\\Seen \\Deleted)] Limited\r\n");
        match r {
            Response::Untagged(UntaggedResponse::Ok { code, .. }) => {
                assert_eq!(
                    code,
                    Some(ResponseCode::Unknown(
                        "PERMANENTFLAGS (\\Seen \\Deleted)".to_string()
                    ))
                );
            }
            other => panic!("expected untagged OK, got {other:?}"),
        }
    }

    #[test]
    fn test_capability() {
        let r = parse(b"* CAPABILITY IMAP4rev1 IDLE AUTH=PLAIN\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Capability(vec![
                "IMAP4rev1".to_string(),
                "IDLE".to_string(),
                "AUTH=PLAIN".to_string(),
            ]))
        );
    }

    #[test]
    fn test_flags() {
        let r = parse(b"* FLAGS (\\Answered \\Flagged \\Seen)\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Flags(vec![
                Flag::Answered,
                Flag::Flagged,
                Flag::Seen,
            ]))
        );
    }

    #[test]
    fn test_status_response() {
        let r = parse(b"* STATUS INBOX (MESSAGES 231 UNSEEN 5)\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Status {
                mailbox: "INBOX".to_string(),
                items: vec![("MESSAGES".to_string(), 231), ("UNSEEN".to_string(), 5)],
            })
        );
    }

    #[test]
    fn test_fetch_response() {
        let r = parse(b"* 2 FETCH (UID 102 RFC822.SIZE 3113)\r\n");
        match r {
            Response::Untagged(UntaggedResponse::Fetch { seq, items }) => {
                assert_eq!(seq.get(), 2);
                assert_eq!(items.len(), 2);
            }
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_continuation() {
        assert_eq!(parse(b"+ Ready for literal\r\n"), Response::Continuation);
    }

    #[test]
    fn test_bye() {
        let r = parse(b"* BYE Autologout; idle for too long\r\n");
        assert_eq!(
            r,
            Response::Untagged(UntaggedResponse::Bye {
                text: "Autologout; idle for too long".to_string(),
            })
        );
    }

    #[test]
    fn test_walk_leaves_single_part() {
        let bs = BodyStructure::Part {
            media_type: "TEXT".to_string(),
            media_subtype: "PLAIN".to_string(),
            params: Vec::new(),
            id: None,
            description: None,
            encoding: "7BIT".to_string(),
            size: 10,
        };
        let leaves = bs.walk_leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].0, "1");
    }

    #[test]
    fn test_walk_leaves_nested() {
        let text = BodyStructure::Part {
            media_type: "TEXT".to_string(),
            media_subtype: "PLAIN".to_string(),
            params: Vec::new(),
            id: None,
            description: None,
            encoding: "7BIT".to_string(),
            size: 10,
        };
        let png = BodyStructure::Part {
            media_type: "IMAGE".to_string(),
            media_subtype: "PNG".to_string(),
            params: Vec::new(),
            id: None,
            description: None,
            encoding: "BASE64".to_string(),
            size: 900,
        };
        let inner = BodyStructure::Multipart {
            parts: vec![text.clone(), png.clone()],
            subtype: "RELATED".to_string(),
        };
        let outer = BodyStructure::Multipart {
            parts: vec![inner, png],
            subtype: "MIXED".to_string(),
        };

        let leaves = outer.walk_leaves();
        let paths: Vec<&str> = leaves.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["1.1", "1.2", "2"]);
        assert!(leaves[1].1.is_media("image", None));
        assert!(!leaves[0].1.is_media("image", None));
    }
}
