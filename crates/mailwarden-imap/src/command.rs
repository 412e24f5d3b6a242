//! Command construction and serialization.
//!
//! Only the commands a polling client needs are modeled: connection checks,
//! login/logout, mailbox selection, UID search, and read-only fetches.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::parser::lexer::is_atom_byte;
use crate::types::{Mailbox, SeqSet, UidSet};

/// Month abbreviations for IMAP date-text (RFC 9051 `date-month`).
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Calendar date in the protocol's `d-Mon-yyyy` form.
///
/// Construction goes through [`ImapDate::new`], so a held value always has
/// an in-range day and month and `Display` cannot index past the month
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImapDate {
    day: u8,
    month: u8,
    year: u16,
}

impl ImapDate {
    /// Creates a date, returning `None` when the day or month is out of range.
    #[must_use]
    pub const fn new(year: u16, month: u8, day: u8) -> Option<Self> {
        if day == 0 || day > 31 || month == 0 || month > 12 {
            return None;
        }
        Some(Self { day, month, year })
    }

    /// Day of month, 1-31.
    #[must_use]
    pub const fn day(self) -> u8 {
        self.day
    }

    /// Month, 1-12.
    #[must_use]
    pub const fn month(self) -> u8 {
        self.month
    }

    /// Four-digit year.
    #[must_use]
    pub const fn year(self) -> u16 {
        self.year
    }
}

impl std::fmt::Display for ImapDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.day,
            MONTHS[(self.month - 1) as usize],
            self.year
        )
    }
}

/// SEARCH criteria subset used for polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// Every message in the mailbox.
    All,
    /// Messages without the `\Seen` flag.
    Unseen,
    /// Messages with an internal date on or after the given day.
    Since(ImapDate),
    /// Messages with a UID in the given set.
    UidIn(UidSet),
}

/// A single FETCH data item request.
///
/// Body content is only ever requested with PEEK: polling must not set
/// `\Seen` on messages the mailbox owner has not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// Message UID.
    Uid,
    /// Envelope (subject, addresses, date, message-id).
    Envelope,
    /// Server-assigned arrival date.
    InternalDate,
    /// Message size in octets.
    Rfc822Size,
    /// MIME structure without content.
    BodyStructure,
    /// Body section content via BODY.PEEK.
    BodyPeek {
        /// Section specifier such as `TEXT`, `1`, or `2.1`; `None` for the
        /// whole message.
        section: Option<String>,
        /// Optional partial range `(start, length)`.
        partial: Option<(u32, u32)>,
    },
}

/// IMAP command subset for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request the server capability list.
    Capability,
    /// Keep-alive / state poll.
    Noop,
    /// Authenticate with LOGIN.
    Login {
        /// User name.
        username: String,
        /// Password or app-specific password.
        password: String,
    },
    /// Select a mailbox read-write.
    Select(Mailbox),
    /// Select a mailbox read-only.
    Examine(Mailbox),
    /// Query mailbox counters without selecting it.
    Status {
        /// Mailbox to query.
        mailbox: Mailbox,
        /// Attribute names, e.g. `MESSAGES`, `UNSEEN`.
        items: Vec<String>,
    },
    /// Search by UID; the result lists UIDs, not sequence numbers.
    UidSearch(SearchKey),
    /// Fetch data items by UID.
    UidFetch {
        /// UIDs to fetch.
        set: UidSet,
        /// Data items to return.
        items: Vec<FetchAttribute>,
    },
    /// Fetch data items by sequence number.
    Fetch {
        /// Sequence numbers to fetch.
        set: SeqSet,
        /// Data items to return.
        items: Vec<FetchAttribute>,
    },
    /// End the session.
    Logout,
}

impl Command {
    /// Serializes the command with its tag, including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');

        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::Noop => buf.extend_from_slice(b"NOOP"),
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }
            Self::Select(mailbox) => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox.as_str());
            }
            Self::Examine(mailbox) => {
                buf.extend_from_slice(b"EXAMINE ");
                write_astring(&mut buf, mailbox.as_str());
            }
            Self::Status { mailbox, items } => {
                buf.extend_from_slice(b"STATUS ");
                write_astring(&mut buf, mailbox.as_str());
                buf.extend_from_slice(b" (");
                buf.extend_from_slice(items.join(" ").as_bytes());
                buf.push(b')');
            }
            Self::UidSearch(key) => {
                buf.extend_from_slice(b"UID SEARCH ");
                write_search_key(&mut buf, key);
            }
            Self::UidFetch { set, items } => {
                buf.extend_from_slice(b"UID FETCH ");
                buf.extend_from_slice(set.to_string().as_bytes());
                buf.push(b' ');
                write_fetch_items(&mut buf, items);
            }
            Self::Fetch { set, items } => {
                buf.extend_from_slice(b"FETCH ");
                buf.extend_from_slice(set.to_string().as_bytes());
                buf.push(b' ');
                write_fetch_items(&mut buf, items);
            }
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Writes an astring (bare atom or quoted string with escapes).
///
/// Goes bare only when every byte is an atom byte. `\` is quoted even
/// though the lexer admits it in flag atoms; an astring must not carry it
/// bare.
fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(|b| b == b'\\' || !is_atom_byte(b)) {
        buf.push(b'"');
        for b in s.bytes() {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

fn write_search_key(buf: &mut Vec<u8>, key: &SearchKey) {
    match key {
        SearchKey::All => buf.extend_from_slice(b"ALL"),
        SearchKey::Unseen => buf.extend_from_slice(b"UNSEEN"),
        SearchKey::Since(date) => {
            buf.extend_from_slice(b"SINCE ");
            buf.extend_from_slice(date.to_string().as_bytes());
        }
        SearchKey::UidIn(set) => {
            buf.extend_from_slice(b"UID ");
            buf.extend_from_slice(set.to_string().as_bytes());
        }
    }
}

fn write_fetch_items(buf: &mut Vec<u8>, items: &[FetchAttribute]) {
    if items.len() == 1 {
        write_fetch_attribute(buf, &items[0]);
        return;
    }
    buf.push(b'(');
    for (i, attr) in items.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        write_fetch_attribute(buf, attr);
    }
    buf.push(b')');
}

fn write_fetch_attribute(buf: &mut Vec<u8>, attr: &FetchAttribute) {
    match attr {
        FetchAttribute::Uid => buf.extend_from_slice(b"UID"),
        FetchAttribute::Envelope => buf.extend_from_slice(b"ENVELOPE"),
        FetchAttribute::InternalDate => buf.extend_from_slice(b"INTERNALDATE"),
        FetchAttribute::Rfc822Size => buf.extend_from_slice(b"RFC822.SIZE"),
        FetchAttribute::BodyStructure => buf.extend_from_slice(b"BODYSTRUCTURE"),
        FetchAttribute::BodyPeek { section, partial } => {
            buf.extend_from_slice(b"BODY.PEEK[");
            if let Some(s) = section {
                buf.extend_from_slice(s.as_bytes());
            }
            buf.push(b']');
            if let Some((start, len)) = partial {
                let mut range = String::new();
                // Writing to a String never fails
                let _ = write!(range, "<{start}.{len}>");
                buf.extend_from_slice(range.as_bytes());
            }
        }
    }
}

/// Tag generator producing unique sequential command tags ("W0000", "W0001", ...).
#[derive(Debug)]
pub struct TagGenerator {
    counter: AtomicU32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self {
            counter: AtomicU32::new(0),
            prefix,
        }
    }

    /// Generates the next tag.
    ///
    /// # Panics
    ///
    /// Panics if the counter would wrap, which requires 4+ billion commands
    /// in one session.
    #[must_use]
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        assert!(n != u32::MAX, "tag counter overflow");
        format!("{}{:04}", self.prefix, n)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('W')
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
    use crate::types::Uid;

    fn serialized(cmd: &Command) -> String {
        String::from_utf8(cmd.serialize("W0000")).unwrap()
    }

    #[test]
    fn test_login_quotes_password() {
        let cmd = Command::Login {
            username: "user@example.com".to_string(),
            password: "p4ss word".to_string(),
        };
        assert_eq!(
            serialized(&cmd),
            "W0000 LOGIN user@example.com \"p4ss word\"\r\n"
        );
    }

    #[test]
    fn test_login_escapes_specials() {
        let cmd = Command::Login {
            username: "u".to_string(),
            password: "a\"b\\c".to_string(),
        };
        assert_eq!(serialized(&cmd), "W0000 LOGIN u \"a\\\"b\\\\c\"\r\n");
    }

    #[test]
    fn test_select_quotes_spaces() {
        let cmd = Command::Select(Mailbox::new("All Mail"));
        assert_eq!(serialized(&cmd), "W0000 SELECT \"All Mail\"\r\n");
    }

    #[test]
    fn test_select_quotes_bracketed_names() {
        let cmd = Command::Select(Mailbox::new("Archive]2024"));
        assert_eq!(serialized(&cmd), "W0000 SELECT \"Archive]2024\"\r\n");
    }

    #[test]
    fn test_status_items() {
        let cmd = Command::Status {
            mailbox: Mailbox::inbox(),
            items: vec!["MESSAGES".to_string(), "UNSEEN".to_string()],
        };
        assert_eq!(serialized(&cmd), "W0000 STATUS INBOX (MESSAGES UNSEEN)\r\n");
    }

    #[test]
    fn test_uid_search_since() {
        let date = ImapDate::new(2024, 3, 7).unwrap();
        let cmd = Command::UidSearch(SearchKey::Since(date));
        assert_eq!(serialized(&cmd), "W0000 UID SEARCH SINCE 7-Mar-2024\r\n");
    }

    #[test]
    fn test_uid_search_above_checkpoint() {
        let set = UidSet::RangeFrom(Uid::new(101).unwrap());
        let cmd = Command::UidSearch(SearchKey::UidIn(set));
        assert_eq!(serialized(&cmd), "W0000 UID SEARCH UID 101:*\r\n");
    }

    #[test]
    fn test_uid_fetch_overview() {
        let cmd = Command::UidFetch {
            set: UidSet::Single(Uid::new(9).unwrap()),
            items: vec![
                FetchAttribute::Uid,
                FetchAttribute::Envelope,
                FetchAttribute::InternalDate,
                FetchAttribute::BodyStructure,
            ],
        };
        assert_eq!(
            serialized(&cmd),
            "W0000 UID FETCH 9 (UID ENVELOPE INTERNALDATE BODYSTRUCTURE)\r\n"
        );
    }

    #[test]
    fn test_single_item_has_no_parens() {
        let cmd = Command::UidFetch {
            set: UidSet::Single(Uid::new(9).unwrap()),
            items: vec![FetchAttribute::BodyPeek {
                section: Some("1".to_string()),
                partial: None,
            }],
        };
        assert_eq!(serialized(&cmd), "W0000 UID FETCH 9 BODY.PEEK[1]\r\n");
    }

    #[test]
    fn test_body_peek_partial() {
        let cmd = Command::Fetch {
            set: SeqSet::range(1, 10).unwrap(),
            items: vec![
                FetchAttribute::Uid,
                FetchAttribute::BodyPeek {
                    section: Some("TEXT".to_string()),
                    partial: Some((0, 2048)),
                },
            ],
        };
        assert_eq!(
            serialized(&cmd),
            "W0000 FETCH 1:10 (UID BODY.PEEK[TEXT]<0.2048>)\r\n"
        );
    }

    #[test]
    fn test_imap_date_validation() {
        assert!(ImapDate::new(2024, 0, 1).is_none());
        assert!(ImapDate::new(2024, 13, 1).is_none());
        assert!(ImapDate::new(2024, 12, 0).is_none());
        assert!(ImapDate::new(2024, 12, 32).is_none());
        assert_eq!(ImapDate::new(2024, 12, 31).unwrap().to_string(), "31-Dec-2024");
    }

    #[test]
    fn test_imap_date_accessors() {
        let date = ImapDate::new(2024, 3, 7).unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 7));
    }

    #[test]
    fn test_imap_date_renders_every_month() {
        let rendered: Vec<String> = (1..=12)
            .map(|month| ImapDate::new(2024, month, 1).unwrap().to_string())
            .collect();
        assert_eq!(rendered.len(), 12);
        assert_eq!(rendered[0], "1-Jan-2024");
        assert_eq!(rendered[11], "1-Dec-2024");
    }

    mod tag_generator_tests {
        use super::*;

        #[test]
        fn test_sequential_tags() {
            let tags = TagGenerator::default();
            assert_eq!(tags.next(), "W0000");
            assert_eq!(tags.next(), "W0001");
            assert_eq!(tags.next(), "W0002");
        }

        #[test]
        fn test_custom_prefix() {
            let tags = TagGenerator::new('P');
            assert_eq!(tags.next(), "P0000");
        }

        #[test]
        fn test_uniqueness() {
            let tags = TagGenerator::default();
            let mut seen = std::collections::HashSet::new();
            for _ in 0..1000 {
                assert!(seen.insert(tags.next()));
            }
        }
    }

    mod property_tests {
        use proptest::prelude::*;

        use super::*;
        use crate::parser::lexer::{Lexer, Token};

        proptest! {
            #[test]
            fn test_astring_survives_lexing(s in "[ -~]{0,30}") {
                // Bare words that collide with other response tokens lex
                // as those tokens, not as atoms.
                prop_assume!(!s.starts_with('+'));
                prop_assume!(s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()));
                prop_assume!(!s.eq_ignore_ascii_case("nil"));

                let mut buf = Vec::new();
                write_astring(&mut buf, &s);
                let mut lexer = Lexer::new(&buf);
                prop_assert_eq!(lexer.read_string().unwrap(), s);
                prop_assert_eq!(lexer.next_token().unwrap(), Token::Eof);
            }

            #[test]
            fn test_any_valid_date_renders(
                year in any::<u16>(),
                month in 1u8..=12,
                day in 1u8..=31,
            ) {
                let date = ImapDate::new(year, month, day).unwrap();
                let rendered = date.to_string();
                prop_assert!(rendered.starts_with(&day.to_string()));
                prop_assert!(rendered.ends_with(&year.to_string()));
                prop_assert_eq!(rendered.matches('-').count(), 2);
            }
        }
    }
}
