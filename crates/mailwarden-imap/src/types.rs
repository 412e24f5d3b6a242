//! Core protocol types: identifiers, mailbox names, flags, and select results.

use std::num::NonZeroU32;

/// Unique identifier of a message within a mailbox.
///
/// UIDs are persistent: they survive expunges and new deliveries, which makes
/// them the only identifier safe to store in a polling checkpoint. Combined
/// with [`UidValidity`] they uniquely identify a message forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU32);

impl Uid {
    /// Creates a new UID. Returns `None` if the value is 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message sequence number, 1-based and ephemeral.
///
/// Sequence numbers shift when messages are expunged; they are only useful
/// within a single selected session (e.g. for a recent-history fetch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNum(pub NonZeroU32);

impl SeqNum {
    /// Creates a new sequence number. Returns `None` if the value is 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for SeqNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UIDVALIDITY value for a mailbox. If this changes, all stored UIDs are void.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UidValidity(pub NonZeroU32);

impl UidValidity {
    /// Creates a new UIDVALIDITY. Returns `None` if the value is 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Mailbox (folder) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox(String);

impl Mailbox {
    /// The canonical inbox, which every server must provide.
    pub const INBOX: &'static str = "INBOX";

    /// Creates a mailbox name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates the inbox mailbox.
    #[must_use]
    pub fn inbox() -> Self {
        Self(Self::INBOX.to_string())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for attention.
    Flagged,
    /// Message is marked for deletion.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message arrived since the last session.
    Recent,
    /// Server-specific keyword flag.
    Keyword(String),
}

impl Flag {
    /// Parses a flag from its wire form.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "\\Seen" => Self::Seen,
            "\\Answered" => Self::Answered,
            "\\Flagged" => Self::Flagged,
            "\\Deleted" => Self::Deleted,
            "\\Draft" => Self::Draft,
            "\\Recent" => Self::Recent,
            other => Self::Keyword(other.to_string()),
        }
    }

    /// Returns the wire form of this flag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }
}

/// Tagged response status keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command succeeded.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command was malformed or inappropriate.
    Bad,
    /// Connection starts pre-authenticated.
    PreAuth,
    /// Server is closing the connection.
    Bye,
}

/// Response code carried in bracketed resp-text, e.g. `[UIDVALIDITY 1234]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// Human attention required.
    Alert,
    /// Mailbox selected read-only.
    ReadOnly,
    /// Mailbox selected read-write.
    ReadWrite,
    /// Target mailbox does not exist but may be created.
    TryCreate,
    /// Predicted next UID for the mailbox.
    UidNext(Uid),
    /// UID validity value for the mailbox.
    UidValidity(UidValidity),
    /// Sequence number of the first unseen message.
    Unseen(SeqNum),
    /// Authentication failed (RFC 5530).
    AuthenticationFailed,
    /// Mailbox does not exist (RFC 5530).
    Nonexistent,
    /// Unrecognized code, kept verbatim.
    Unknown(String),
}

/// A set of UIDs for UID FETCH / UID SEARCH commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidSet {
    /// A single UID.
    Single(Uid),
    /// An inclusive range.
    Range(Uid, Uid),
    /// From a UID to the highest UID in the mailbox.
    RangeFrom(Uid),
    /// An explicit list of UIDs.
    List(Vec<Uid>),
}

impl UidSet {
    /// Builds a set from a slice of raw UID values, skipping zeros.
    #[must_use]
    pub fn from_values(values: &[u32]) -> Self {
        Self::List(values.iter().copied().filter_map(Uid::new).collect())
    }
}

impl std::fmt::Display for UidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(uid) => write!(f, "{uid}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::RangeFrom(start) => write!(f, "{start}:*"),
            Self::List(uids) => {
                let parts: Vec<_> = uids.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

/// A set of message sequence numbers for plain FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqSet {
    /// A single sequence number.
    Single(SeqNum),
    /// An inclusive range.
    Range(SeqNum, SeqNum),
    /// From a sequence number to the end of the mailbox.
    RangeFrom(SeqNum),
}

impl SeqSet {
    /// Builds an inclusive range, returning `None` if either bound is 0.
    #[must_use]
    pub fn range(start: u32, end: u32) -> Option<Self> {
        Some(Self::Range(SeqNum::new(start)?, SeqNum::new(end)?))
    }
}

impl std::fmt::Display for SeqSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::RangeFrom(start) => write!(f, "{start}:*"),
        }
    }
}

/// Snapshot of a mailbox produced by SELECT or EXAMINE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxSnapshot {
    /// Total number of messages.
    pub exists: u32,
    /// Number of messages with the `\Recent` flag.
    pub recent: u32,
    /// First unseen sequence number, if reported.
    pub unseen: Option<SeqNum>,
    /// UIDVALIDITY, if reported.
    pub uid_validity: Option<UidValidity>,
    /// Predicted next UID, if reported.
    pub uid_next: Option<Uid>,
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

    mod uid_tests {
        use super::*;

        #[test]
        fn test_zero_is_rejected() {
            assert!(Uid::new(0).is_none());
            assert!(SeqNum::new(0).is_none());
            assert!(UidValidity::new(0).is_none());
        }

        #[test]
        fn test_display() {
            assert_eq!(Uid::new(42).unwrap().to_string(), "42");
            assert_eq!(SeqNum::new(7).unwrap().to_string(), "7");
        }

        #[test]
        fn test_ordering() {
            assert!(Uid::new(3).unwrap() < Uid::new(10).unwrap());
        }
    }

    mod flag_tests {
        use super::*;

        #[test]
        fn test_parse_round_trip() {
            for raw in ["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft"] {
                assert_eq!(Flag::parse(raw).as_str(), raw);
            }
        }

        #[test]
        fn test_keyword_flag() {
            let flag = Flag::parse("$Phishing");
            assert_eq!(flag, Flag::Keyword("$Phishing".to_string()));
            assert_eq!(flag.as_str(), "$Phishing");
        }
    }

    mod uid_set_tests {
        use proptest::prelude::*;

        use super::*;

        #[test]
        fn test_display_forms() {
            let uid = |n| Uid::new(n).unwrap();
            assert_eq!(UidSet::Single(uid(5)).to_string(), "5");
            assert_eq!(UidSet::Range(uid(1), uid(9)).to_string(), "1:9");
            assert_eq!(UidSet::RangeFrom(uid(100)).to_string(), "100:*");
            assert_eq!(
                UidSet::List(vec![uid(1), uid(3), uid(8)]).to_string(),
                "1,3,8"
            );
        }

        #[test]
        fn test_from_values_skips_zero() {
            let set = UidSet::from_values(&[0, 2, 5]);
            assert_eq!(set.to_string(), "2,5");
        }

        proptest! {
            #[test]
            fn test_from_values_display_reparses(
                values in proptest::collection::vec(any::<u32>(), 0..32),
            ) {
                let rendered = UidSet::from_values(&values).to_string();
                let expected: Vec<u32> =
                    values.iter().copied().filter(|&v| v != 0).collect();
                let parsed: Vec<u32> = if rendered.is_empty() {
                    Vec::new()
                } else {
                    rendered
                        .split(',')
                        .map(|part| part.parse().unwrap())
                        .collect()
                };
                prop_assert_eq!(parsed, expected);
            }
        }
    }

    mod seq_set_tests {
        use super::*;

        #[test]
        fn test_range_bounds() {
            assert!(SeqSet::range(0, 5).is_none());
            assert_eq!(SeqSet::range(2, 5).unwrap().to_string(), "2:5");
        }

        #[test]
        fn test_range_from() {
            let set = SeqSet::RangeFrom(SeqNum::new(90).unwrap());
            assert_eq!(set.to_string(), "90:*");
        }
    }
}
