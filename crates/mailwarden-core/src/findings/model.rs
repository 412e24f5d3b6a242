//! Persistent record of a detected violation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::classify::{Assessment, CategoryMatch, ImageAnnotation, Severity};
use crate::mailbox::RawMessage;

/// Characters of message body kept as the finding's snippet.
const SNIPPET_MAX_CHARS: usize = 240;

/// Database identifier for a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingId(pub i64);

impl FindingId {
    /// Creates a new finding ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Review state of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingStatus {
    /// Detected, not yet looked at.
    #[default]
    New,
    /// A reviewer has read it.
    Reviewed,
    /// Closed out.
    Resolved,
}

impl FindingStatus {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "reviewed" => Self::Reviewed,
            "resolved" => Self::Resolved,
            _ => Self::New,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reviewed => "reviewed",
            Self::Resolved => "resolved",
        }
    }
}

/// One detected violation, created at most once per (account, message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Database ID, `None` until saved.
    pub id: Option<FindingId>,
    /// Account the message belongs to.
    pub account_id: AccountId,
    /// Message-ID header of the offending message.
    pub message_id: String,
    /// Decoded subject line.
    pub subject: String,
    /// Formatted sender.
    pub sender: String,
    /// Bounded excerpt of the body.
    pub snippet: String,
    /// Worst per-match severity.
    pub severity: Severity,
    /// Mean per-match confidence, capped at 0.95.
    pub confidence: f64,
    /// The individual matches, in detection order.
    pub matches: Vec<CategoryMatch>,
    /// Localization notes for flagged images.
    pub annotations: Vec<ImageAnnotation>,
    /// Review state.
    pub status: FindingStatus,
    /// When the violation was detected.
    pub detected_at: DateTime<Utc>,
}

impl Finding {
    /// Builds a finding from a violating assessment. Returns `None` when
    /// the assessment is not a violation.
    #[must_use]
    pub fn from_assessment(
        account_id: AccountId,
        message: &RawMessage,
        assessment: &Assessment,
    ) -> Option<Self> {
        if !assessment.is_violation() {
            return None;
        }

        Some(Self {
            id: None,
            account_id,
            message_id: message.message_id.clone(),
            subject: message.subject.clone(),
            sender: message.from.clone(),
            snippet: snippet(&message.body),
            severity: assessment.max_severity().unwrap_or(Severity::Low),
            confidence: assessment.mean_confidence(),
            matches: assessment.matches.clone(),
            annotations: assessment.annotated_images.clone(),
            status: FindingStatus::New,
            detected_at: Utc::now(),
        })
    }
}

/// Truncate body text to a short display excerpt.
fn snippet(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control())
        .take(SNIPPET_MAX_CHARS)
        .collect();

    if text.chars().count() > SNIPPET_MAX_CHARS {
        format!("{cleaned}...")
    } else {
        cleaned
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    mod status_tests {
        use super::*;

        #[test]
        fn parse_known_values() {
            assert_eq!(FindingStatus::parse("reviewed"), FindingStatus::Reviewed);
            assert_eq!(FindingStatus::parse("RESOLVED"), FindingStatus::Resolved);
        }

        #[test]
        fn parse_unknown_defaults_to_new() {
            assert_eq!(FindingStatus::parse("archived"), FindingStatus::New);
        }

        #[test]
        fn roundtrip() {
            for status in [
                FindingStatus::New,
                FindingStatus::Reviewed,
                FindingStatus::Resolved,
            ] {
                assert_eq!(FindingStatus::parse(status.as_str()), status);
            }
        }
    }

    mod finding_tests {
        use super::*;
        use crate::classify::RiskLevel;
        use crate::monitor::config::Category;

        fn raw_message() -> RawMessage {
            RawMessage {
                uid: 3,
                message_id: "<abc@example.com>".to_string(),
                subject: "Final warning".to_string(),
                from: "sender@example.com".to_string(),
                to: "owner@example.com".to_string(),
                date: None,
                body: "I will kill you if you don't listen".to_string(),
                images: Vec::new(),
            }
        }

        fn violating_assessment() -> Assessment {
            Assessment {
                risk: RiskLevel::Danger,
                score: 88,
                matched_categories: vec![Category::Threats],
                explanation: "1 suspicious phrase detected across: threats".to_string(),
                matches: vec![CategoryMatch {
                    category: Category::Threats,
                    phrase: "i will kill you".to_string(),
                    context: "i will kill you if you don't listen".to_string(),
                    severity: Severity::High,
                    confidence: 0.9,
                }],
                annotated_images: Vec::new(),
            }
        }

        #[test]
        fn from_violation() {
            let finding =
                Finding::from_assessment(AccountId::new(1), &raw_message(), &violating_assessment())
                    .unwrap();

            assert_eq!(finding.account_id, AccountId::new(1));
            assert_eq!(finding.message_id, "<abc@example.com>");
            assert_eq!(finding.severity, Severity::High);
            assert_eq!(finding.confidence, 0.9);
            assert_eq!(finding.status, FindingStatus::New);
            assert!(finding.id.is_none());
        }

        #[test]
        fn safe_assessment_yields_nothing() {
            let assessment = Assessment::safe("no policy violations detected");
            assert!(
                Finding::from_assessment(AccountId::new(1), &raw_message(), &assessment).is_none()
            );
        }

        #[test]
        fn snippet_is_bounded() {
            let long = "word ".repeat(200);
            let cut = snippet(&long);
            assert!(cut.ends_with("..."));
            assert_eq!(cut.chars().count(), SNIPPET_MAX_CHARS + 3);

            assert_eq!(snippet("short body"), "short body");
        }
    }
}
