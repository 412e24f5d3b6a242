//! Classification result types.

use serde::{Deserialize, Serialize};

use crate::monitor::config::Category;

/// Severity of a single match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Marginal; worth recording, rarely worth acting on.
    Low,
    /// Clear policy violation.
    Medium,
    /// Requires attention.
    High,
}

impl Severity {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Overall risk bucket for an assessed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    /// No enabled category matched, or the score stayed below 40.
    Safe,
    /// Score in 40..=70.
    Warning,
    /// Score of 71 or above.
    Danger,
}

impl RiskLevel {
    /// Buckets a 0-100 score.
    #[must_use]
    pub const fn from_score(score: u8) -> Self {
        if score >= 71 {
            Self::Danger
        } else if score >= 40 {
            Self::Warning
        } else {
            Self::Safe
        }
    }

    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "warning" => Self::Warning,
            "danger" => Self::Danger,
            _ => Self::Safe,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

/// One keyword or pattern hit inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMatch {
    /// Category the match belongs to.
    pub category: Category,
    /// The matched phrase itself.
    pub phrase: String,
    /// Surrounding text window.
    pub context: String,
    /// Severity assigned to this match.
    pub severity: Severity,
    /// Confidence in [0, 1]: 0.7 for keyword hits, 0.9 for pattern hits.
    pub confidence: f64,
}

/// Localization note for one flagged image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAnnotation {
    /// Attachment filename the note refers to.
    pub filename: String,
    /// Where in the image the flagged content sits, or the fallback text
    /// when the remote annotator was unavailable.
    pub description: String,
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Risk bucket derived from the score.
    pub risk: RiskLevel,
    /// Composite score in [0, 100].
    pub score: u8,
    /// Categories with at least one match, in match order, deduplicated.
    pub matched_categories: Vec<Category>,
    /// Human-readable summary of what drove the result.
    pub explanation: String,
    /// All matches, ordered by enabled-category order then match position.
    pub matches: Vec<CategoryMatch>,
    /// Per-image annotations, present only for warning/danger results
    /// with image attachments.
    pub annotated_images: Vec<ImageAnnotation>,
}

impl Assessment {
    /// A safe assessment with no matches.
    #[must_use]
    pub fn safe(explanation: impl Into<String>) -> Self {
        Self {
            risk: RiskLevel::Safe,
            score: 0,
            matched_categories: Vec::new(),
            explanation: explanation.into(),
            matches: Vec::new(),
            annotated_images: Vec::new(),
        }
    }

    /// Whether the message violated policy at all.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Highest per-match severity, `None` when nothing matched.
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.matches.iter().map(|m| m.severity).max()
    }

    /// Mean of per-match confidences, capped at 0.95. Zero when nothing
    /// matched.
    #[must_use]
    pub fn mean_confidence(&self) -> f64 {
        if self.matches.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = self.matches.iter().map(|m| m.confidence).sum::<f64>()
            / self.matches.len() as f64;
        mean.min(0.95)
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
    use crate::monitor::config::Category;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_severity_roundtrip() {
        for severity in [Severity::Low, Severity::Medium, Severity::High] {
            assert_eq!(Severity::parse(severity.as_str()), severity);
        }
    }

    #[test]
    fn test_risk_bucket_boundaries() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_score(39), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_score(40), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_score(70), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_score(71), RiskLevel::Danger);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Danger);
    }

    #[test]
    fn test_risk_roundtrip() {
        for risk in [RiskLevel::Safe, RiskLevel::Warning, RiskLevel::Danger] {
            assert_eq!(RiskLevel::parse(risk.as_str()), risk);
        }
    }

    fn match_with(severity: Severity, confidence: f64) -> CategoryMatch {
        CategoryMatch {
            category: Category::Harassment,
            phrase: "phrase".to_string(),
            context: "context".to_string(),
            severity,
            confidence,
        }
    }

    #[test]
    fn test_safe_assessment() {
        let assessment = Assessment::safe("nothing matched");
        assert!(!assessment.is_violation());
        assert_eq!(assessment.max_severity(), None);
        assert!(assessment.mean_confidence().abs() < f64::EPSILON);
    }

    #[test]
    fn test_max_severity_and_mean_confidence() {
        let assessment = Assessment {
            risk: RiskLevel::Warning,
            score: 55,
            matched_categories: vec![Category::Harassment],
            explanation: String::new(),
            matches: vec![
                match_with(Severity::Low, 0.7),
                match_with(Severity::High, 0.9),
            ],
            annotated_images: Vec::new(),
        };

        assert_eq!(assessment.max_severity(), Some(Severity::High));
        let mean = assessment.mean_confidence();
        assert!((mean - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_mean_confidence_is_capped() {
        let assessment = Assessment {
            risk: RiskLevel::Danger,
            score: 90,
            matched_categories: vec![Category::Harassment],
            explanation: String::new(),
            matches: vec![match_with(Severity::High, 0.99), match_with(Severity::High, 0.99)],
            annotated_images: Vec::new(),
        };
        assert!((assessment.mean_confidence() - 0.95).abs() < 1e-9);
    }
}
