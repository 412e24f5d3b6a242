//! Monitoring configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Shortest interval the engine will poll a provider at.
///
/// Anything faster is indistinguishable from hammering the server; the
/// floor is applied when a frequency is resolved to a duration.
pub const POLL_FLOOR: Duration = Duration::from_secs(30);

/// How aggressively ambiguous content is escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sensitivity {
    /// Flag only clear-cut matches at low severity.
    Low,
    /// Balanced default.
    #[default]
    Medium,
    /// Escalate every match.
    High,
}

impl Sensitivity {
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

/// Violation category the classifier can screen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Personal attacks and demeaning language.
    Harassment,
    /// Exclusionary or prejudicial language.
    Discrimination,
    /// Sexual or otherwise unprofessional content.
    Inappropriate,
    /// Threats of violence or retaliation.
    Threats,
}

impl Category {
    /// All categories, in a fixed order.
    pub const ALL: [Self; 4] = [
        Self::Harassment,
        Self::Discrimination,
        Self::Inappropriate,
        Self::Threats,
    ];

    /// Parse from string representation. Unknown strings are rejected
    /// rather than mapped to a default: silently enabling the wrong
    /// category would change what gets flagged.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "harassment" => Some(Self::Harassment),
            "discrimination" => Some(Self::Discrimination),
            "inappropriate" => Some(Self::Inappropriate),
            "threats" => Some(Self::Threats),
            _ => None,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Harassment => "harassment",
            Self::Discrimination => "discrimination",
            Self::Inappropriate => "inappropriate",
            Self::Threats => "threats",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a monitor polls its mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollFrequency {
    /// As fast as the protocol floor allows.
    #[serde(rename = "realtime")]
    Realtime,
    /// Every thirty seconds.
    #[serde(rename = "30s")]
    ThirtySeconds,
    /// Every minute.
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    /// Every five minutes.
    #[serde(rename = "5m")]
    FiveMinutes,
}

impl PollFrequency {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "realtime" => Self::Realtime,
            "30s" => Self::ThirtySeconds,
            "5m" => Self::FiveMinutes,
            _ => Self::OneMinute,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::ThirtySeconds => "30s",
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
        }
    }

    /// The concrete polling interval, with [`POLL_FLOOR`] applied.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        let raw = match self {
            Self::Realtime => Duration::from_secs(0),
            Self::ThirtySeconds => Duration::from_secs(30),
            Self::OneMinute => Duration::from_secs(60),
            Self::FiveMinutes => Duration::from_secs(300),
        };
        if raw.as_secs() < POLL_FLOOR.as_secs() {
            POLL_FLOOR
        } else {
            raw
        }
    }
}

/// Delivery channel a violation event may fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Email digest to the account owner.
    Email,
    /// Live dashboard stream.
    Dashboard,
    /// Text message.
    Sms,
    /// Workspace chat webhook.
    ChatIntegration,
}

impl ChannelKind {
    /// Parse from string representation. Unknown strings are rejected.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "dashboard" => Some(Self::Dashboard),
            "sms" => Some(Self::Sms),
            "chat-integration" => Some(Self::ChatIntegration),
            _ => None,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Dashboard => "dashboard",
            Self::Sms => "sms",
            Self::ChatIntegration => "chat-integration",
        }
    }
}

/// A monitoring policy for one account.
///
/// One account has at most one active config; replacing it atomically
/// stops the old monitor and starts a new one with the new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Owning account.
    pub account_id: AccountId,
    /// Escalation aggressiveness.
    pub sensitivity: Sensitivity,
    /// Enabled violation categories.
    pub categories: Vec<Category>,
    /// Poll cadence.
    pub frequency: PollFrequency,
    /// Enabled delivery channels.
    pub channels: Vec<ChannelKind>,
    /// Whether monitoring is currently switched on.
    pub active: bool,
}

impl MonitoringConfig {
    /// Creates an active config with explicit values.
    #[must_use]
    pub const fn new(
        account_id: AccountId,
        sensitivity: Sensitivity,
        categories: Vec<Category>,
        frequency: PollFrequency,
        channels: Vec<ChannelKind>,
    ) -> Self {
        Self {
            account_id,
            sensitivity,
            categories,
            frequency,
            channels,
            active: true,
        }
    }

    /// A permissive config for tests and demos: every category enabled,
    /// medium sensitivity, one-minute polling, dashboard delivery.
    #[must_use]
    pub fn default_for(account_id: AccountId) -> Self {
        Self::new(
            account_id,
            Sensitivity::Medium,
            Category::ALL.to_vec(),
            PollFrequency::OneMinute,
            vec![ChannelKind::Dashboard],
        )
    }

    /// The concrete polling interval (floored at 30 seconds).
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.frequency.interval()
    }

    /// Whether a category is enabled.
    #[must_use]
    pub fn has_category(&self, category: Category) -> bool {
        self.categories.contains(&category)
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
    fn test_sensitivity_roundtrip() {
        for sensitivity in [Sensitivity::Low, Sensitivity::Medium, Sensitivity::High] {
            assert_eq!(Sensitivity::parse(sensitivity.as_str()), sensitivity);
        }
    }

    #[test]
    fn test_sensitivity_unknown_defaults_to_medium() {
        assert_eq!(Sensitivity::parse("extreme"), Sensitivity::Medium);
    }

    #[test]
    fn test_category_roundtrip() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_category_unknown_is_rejected() {
        assert_eq!(Category::parse("gossip"), None);
    }

    #[test]
    fn test_frequency_roundtrip() {
        for frequency in [
            PollFrequency::Realtime,
            PollFrequency::ThirtySeconds,
            PollFrequency::OneMinute,
            PollFrequency::FiveMinutes,
        ] {
            assert_eq!(PollFrequency::parse(frequency.as_str()), frequency);
        }
    }

    #[test]
    fn test_realtime_is_floored_to_thirty_seconds() {
        assert_eq!(PollFrequency::Realtime.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_slower_frequencies_are_not_floored() {
        assert_eq!(
            PollFrequency::ThirtySeconds.interval(),
            Duration::from_secs(30)
        );
        assert_eq!(PollFrequency::OneMinute.interval(), Duration::from_secs(60));
        assert_eq!(
            PollFrequency::FiveMinutes.interval(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_channel_kind_roundtrip() {
        for channel in [
            ChannelKind::Email,
            ChannelKind::Dashboard,
            ChannelKind::Sms,
            ChannelKind::ChatIntegration,
        ] {
            assert_eq!(ChannelKind::parse(channel.as_str()), Some(channel));
        }
    }

    #[test]
    fn test_serde_wire_strings() {
        assert_eq!(
            serde_json::to_string(&PollFrequency::ThirtySeconds).unwrap(),
            "\"30s\""
        );
        assert_eq!(
            serde_json::to_string(&ChannelKind::ChatIntegration).unwrap(),
            "\"chat-integration\""
        );
        assert_eq!(
            serde_json::from_str::<Category>("\"threats\"").unwrap(),
            Category::Threats
        );
    }

    #[test]
    fn test_config_construction() {
        let config = MonitoringConfig::new(
            AccountId::new(1),
            Sensitivity::High,
            vec![Category::Threats],
            PollFrequency::Realtime,
            vec![ChannelKind::Email, ChannelKind::Dashboard],
        );

        assert!(config.active);
        assert!(config.has_category(Category::Threats));
        assert!(!config.has_category(Category::Harassment));
        assert_eq!(config.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_for_enables_everything() {
        let config = MonitoringConfig::default_for(AccountId::new(9));
        for category in Category::ALL {
            assert!(config.has_category(category));
        }
        assert_eq!(config.interval(), Duration::from_secs(60));
    }
}
