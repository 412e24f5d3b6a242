//! Account model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Security/encryption mode for IMAP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Security {
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// No encryption. Only sensible against a local test server.
    Plain,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Tls => "SSL/TLS",
            Self::Plain => "None (insecure)",
        }
    }
}

/// IMAP server endpoint, plus the login name used against it.
///
/// The password is never stored here; it lives in the credential store
/// keyed by account id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImapEndpoint {
    /// Server hostname.
    pub host: String,
    /// Server port (default: 993 for TLS, 143 for plaintext).
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication, usually the account email.
    pub username: String,
}

impl ImapEndpoint {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::Tls => 993,
            Security::Plain => 143,
        }
    }
}

/// Monitored email account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier (None for unsaved accounts).
    pub id: Option<AccountId>,
    /// Display name for the account.
    pub name: String,
    /// Email address.
    pub email: String,
    /// IMAP endpoint.
    pub imap: ImapEndpoint,
    /// Whether the account is eligible for monitoring.
    ///
    /// Accounts are never hard-deleted, only deactivated.
    pub active: bool,
    /// Completion time of the last successful poll cycle.
    pub last_synced: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new empty account.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create account with common defaults for well-known providers.
    #[must_use]
    pub fn with_email(email: &str) -> Self {
        let mut account = Self {
            email: email.to_string(),
            active: true,
            ..Default::default()
        };

        // Auto-detect provider settings
        if let Some(domain) = email.split('@').nth(1) {
            match domain.to_lowercase().as_str() {
                "gmail.com" | "googlemail.com" => {
                    account.name = "Gmail".to_string();
                    account.imap.host = "imap.gmail.com".to_string();
                    account.imap.port = 993;
                    account.imap.security = Security::Tls;
                }
                "outlook.com" | "hotmail.com" | "live.com" => {
                    account.name = "Outlook".to_string();
                    account.imap.host = "outlook.office365.com".to_string();
                    account.imap.port = 993;
                    account.imap.security = Security::Tls;
                }
                "yahoo.com" | "ymail.com" => {
                    account.name = "Yahoo".to_string();
                    account.imap.host = "imap.mail.yahoo.com".to_string();
                    account.imap.port = 993;
                    account.imap.security = Security::Tls;
                }
                "icloud.com" | "me.com" | "mac.com" => {
                    account.name = "iCloud".to_string();
                    account.imap.host = "imap.mail.me.com".to_string();
                    account.imap.port = 993;
                    account.imap.security = Security::Tls;
                }
                _ => {
                    // Use domain as account name
                    account.name = domain.to_string();
                }
            }
        }

        // Set username to email by default
        account.imap.username = email.to_string();

        account
    }

    /// Take the account out of monitoring without deleting it.
    pub const fn deactivate(&mut self) {
        self.active = false;
    }

    /// Record a completed poll cycle.
    pub const fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced = Some(at);
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

    mod account_id_tests {
        use super::*;

        #[test]
        fn new() {
            let id = AccountId::new(42);
            assert_eq!(id.0, 42);
        }

        #[test]
        fn display() {
            let id = AccountId::new(123);
            assert_eq!(format!("{id}"), "123");
        }

        #[test]
        fn equality() {
            let id1 = AccountId::new(1);
            let id2 = AccountId::new(1);
            let id3 = AccountId::new(2);
            assert_eq!(id1, id2);
            assert_ne!(id1, id3);
        }
    }

    mod security_tests {
        use super::*;

        #[test]
        fn default_is_tls() {
            assert_eq!(Security::default(), Security::Tls);
        }

        #[test]
        fn display_names() {
            assert_eq!(Security::Tls.display_name(), "SSL/TLS");
            assert_eq!(Security::Plain.display_name(), "None (insecure)");
        }

        #[test]
        fn serde_kebab_case() {
            assert_eq!(serde_json::to_string(&Security::Tls).unwrap(), "\"tls\"");
            assert_eq!(
                serde_json::from_str::<Security>("\"plain\"").unwrap(),
                Security::Plain
            );
        }
    }

    mod endpoint_tests {
        use super::*;

        #[test]
        fn default_port_tls() {
            assert_eq!(ImapEndpoint::default_port(Security::Tls), 993);
        }

        #[test]
        fn default_port_plain() {
            assert_eq!(ImapEndpoint::default_port(Security::Plain), 143);
        }

        #[test]
        fn default() {
            let endpoint = ImapEndpoint::default();
            assert!(endpoint.host.is_empty());
            assert_eq!(endpoint.port, 0);
            assert_eq!(endpoint.security, Security::Tls);
        }
    }

    mod account_tests {
        use super::*;

        #[test]
        fn new_creates_empty() {
            let account = Account::new();
            assert!(account.id.is_none());
            assert!(account.name.is_empty());
            assert!(account.email.is_empty());
            assert!(!account.active);
            assert!(account.last_synced.is_none());
        }

        #[test]
        fn with_email_gmail() {
            let account = Account::with_email("user@gmail.com");
            assert_eq!(account.name, "Gmail");
            assert_eq!(account.email, "user@gmail.com");
            assert_eq!(account.imap.host, "imap.gmail.com");
            assert_eq!(account.imap.port, 993);
            assert_eq!(account.imap.security, Security::Tls);
            assert_eq!(account.imap.username, "user@gmail.com");
            assert!(account.active);
        }

        #[test]
        fn with_email_googlemail() {
            let account = Account::with_email("user@googlemail.com");
            assert_eq!(account.name, "Gmail");
            assert_eq!(account.imap.host, "imap.gmail.com");
        }

        #[test]
        fn with_email_outlook() {
            let account = Account::with_email("user@outlook.com");
            assert_eq!(account.name, "Outlook");
            assert_eq!(account.imap.host, "outlook.office365.com");
        }

        #[test]
        fn with_email_hotmail() {
            let account = Account::with_email("user@hotmail.com");
            assert_eq!(account.name, "Outlook");
        }

        #[test]
        fn with_email_yahoo() {
            let account = Account::with_email("user@yahoo.com");
            assert_eq!(account.name, "Yahoo");
            assert_eq!(account.imap.host, "imap.mail.yahoo.com");
        }

        #[test]
        fn with_email_icloud() {
            let account = Account::with_email("user@icloud.com");
            assert_eq!(account.name, "iCloud");
            assert_eq!(account.imap.host, "imap.mail.me.com");
        }

        #[test]
        fn with_email_unknown_domain() {
            let account = Account::with_email("user@example.org");
            assert_eq!(account.name, "example.org");
            // Host should not be auto-filled for unknown domains
            assert!(account.imap.host.is_empty());
        }

        #[test]
        fn deactivate() {
            let mut account = Account::with_email("user@example.org");
            assert!(account.active);
            account.deactivate();
            assert!(!account.active);
        }

        #[test]
        fn mark_synced() {
            let mut account = Account::with_email("user@example.org");
            let now = Utc::now();
            account.mark_synced(now);
            assert_eq!(account.last_synced, Some(now));
        }
    }
}
