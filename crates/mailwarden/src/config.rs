//! Daemon configuration file.
//!
//! JSON, by default at `<config dir>/mailwarden/config.json`. Accounts
//! carry their IMAP endpoint and monitoring settings; passwords belong
//! in the OS keyring and are only accepted inline as a bootstrap
//! convenience.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use mailwarden_core::{
    Account, AccountId, Category, ChannelKind, ImapEndpoint, MonitoringConfig, PollFrequency,
    Sensitivity,
};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Monitored accounts.
    pub accounts: Vec<AccountEntry>,
    /// Findings database path. Defaults to the platform data directory.
    pub database: Option<PathBuf>,
    /// Remote vision classifier. Image screening degrades to text-only
    /// heuristics when absent.
    pub vision: Option<VisionConfig>,
}

/// One monitored account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Stable identifier. Findings, credentials, and monitor state all
    /// key on it, so changing it orphans history.
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Address being monitored.
    pub email: String,
    /// IMAP endpoint.
    pub imap: ImapEndpoint,
    /// Password seeded into the OS keyring at startup. Prefer
    /// provisioning the keyring out of band and leaving this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Monitoring settings.
    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

impl AccountEntry {
    /// Typed account id.
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        AccountId::new(self.id)
    }

    /// Builds the core account model.
    #[must_use]
    pub fn to_account(&self) -> Account {
        Account {
            id: Some(self.account_id()),
            name: self.name.clone(),
            email: self.email.clone(),
            imap: self.imap.clone(),
            active: self.monitoring.active,
            last_synced: None,
        }
    }
}

/// Per-account monitoring settings, all optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Whether a monitor is started for the account.
    pub active: bool,
    /// Escalation aggressiveness.
    pub sensitivity: Sensitivity,
    /// Enabled violation categories.
    pub categories: Vec<Category>,
    /// Poll cadence.
    pub frequency: PollFrequency,
    /// Delivery channels for violation events.
    pub channels: Vec<ChannelKind>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            active: true,
            sensitivity: Sensitivity::Medium,
            categories: Category::ALL.to_vec(),
            frequency: PollFrequency::OneMinute,
            channels: vec![ChannelKind::Dashboard],
        }
    }
}

impl MonitoringSettings {
    /// Builds the core monitoring config for an account.
    #[must_use]
    pub fn to_config(&self, account_id: AccountId) -> MonitoringConfig {
        let mut config = MonitoringConfig::new(
            account_id,
            self.sensitivity,
            self.categories.clone(),
            self.frequency,
            self.channels.clone(),
        );
        config.active = self.active;
        config
    }
}

/// Remote vision classifier endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Classifier base URL.
    pub endpoint: String,
    /// Bearer token, unset for unauthenticated endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Default config path: `<config dir>/mailwarden/config.json`.
#[must_use]
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailwarden")
        .join("config.json")
}

/// Default findings database path: `<data dir>/mailwarden/findings.db`.
#[must_use]
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailwarden")
        .join("findings.db")
}

/// Loads and parses the configuration file.
pub async fn load(path: &Path) -> anyhow::Result<DaemonConfig> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
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
    fn test_minimal_account_gets_defaults() {
        let json = r#"{
            "accounts": [{
                "id": 1,
                "email": "owner@example.com",
                "imap": {
                    "host": "imap.example.com",
                    "port": 993,
                    "security": "tls",
                    "username": "owner@example.com"
                }
            }]
        }"#;

        let config: DaemonConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.accounts.len(), 1);
        assert!(config.database.is_none());
        assert!(config.vision.is_none());

        let entry = &config.accounts[0];
        assert!(entry.password.is_none());
        assert!(entry.monitoring.active);
        assert_eq!(entry.monitoring.sensitivity, Sensitivity::Medium);
        assert_eq!(entry.monitoring.categories, Category::ALL.to_vec());
        assert_eq!(entry.monitoring.frequency, PollFrequency::OneMinute);
    }

    #[test]
    fn test_full_config_round_trips() {
        let json = r#"{
            "accounts": [{
                "id": 7,
                "name": "Work",
                "email": "hr@example.com",
                "imap": {
                    "host": "mail.example.com",
                    "port": 143,
                    "security": "plain",
                    "username": "hr"
                },
                "password": "app-password",
                "monitoring": {
                    "active": false,
                    "sensitivity": "high",
                    "categories": ["threats", "harassment"],
                    "frequency": "30s",
                    "channels": ["dashboard", "email"]
                }
            }],
            "database": "/tmp/findings.db",
            "vision": {
                "endpoint": "https://vision.example.com/v1",
                "api_key": "secret"
            }
        }"#;

        let config: DaemonConfig = serde_json::from_str(json).unwrap();
        let entry = &config.accounts[0];
        assert_eq!(entry.account_id(), AccountId::new(7));
        assert_eq!(entry.password.as_deref(), Some("app-password"));
        assert!(!entry.monitoring.active);
        assert_eq!(entry.monitoring.categories.len(), 2);
        assert_eq!(
            config.vision.as_ref().unwrap().endpoint,
            "https://vision.example.com/v1"
        );

        let back = serde_json::to_string(&config).unwrap();
        let reparsed: DaemonConfig = serde_json::from_str(&back).unwrap();
        assert_eq!(reparsed.accounts[0].email, "hr@example.com");
    }

    #[test]
    fn test_to_account_and_config_wiring() {
        let entry = AccountEntry {
            id: 3,
            name: String::new(),
            email: "x@example.com".to_string(),
            imap: ImapEndpoint::default(),
            password: None,
            monitoring: MonitoringSettings::default(),
        };

        let account = entry.to_account();
        assert_eq!(account.id, Some(AccountId::new(3)));
        assert!(account.active);

        let config = entry.monitoring.to_config(entry.account_id());
        assert_eq!(config.account_id, AccountId::new(3));
        assert!(config.active);
        assert!(config.has_category(Category::Threats));
    }
}
