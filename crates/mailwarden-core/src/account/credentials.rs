//! Secure credential storage.
//!
//! The monitor resolves each account's mailbox password through the
//! [`CredentialStore`] trait. The production implementation uses the
//! platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! An in-memory implementation exists for tests and demos.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use keyring::Entry;
use tracing::debug;

use super::AccountId;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailwarden";

/// Credential type identifier for IMAP passwords.
const IMAP_CREDENTIAL: &str = "imap";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// A mailbox password or app-specific password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// The secret itself.
    pub secret: String,
}

impl Credential {
    /// Wraps a secret string.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

// The secret must never reach logs through a Debug format.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Storage for account mailbox credentials.
///
/// Keyring access is synchronous and fast; callers invoke these from
/// async contexts directly.
pub trait CredentialStore: Send + Sync {
    /// Retrieves the credential for an account, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be accessed.
    fn get(&self, account_id: AccountId) -> CredentialResult<Option<Credential>>;

    /// Stores the credential for an account, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be accessed.
    fn put(&self, account_id: AccountId, credential: &Credential) -> CredentialResult<()>;

    /// Removes the credential for an account. Missing entries are not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be accessed.
    fn delete(&self, account_id: AccountId) -> CredentialResult<()>;
}

/// Generates the keyring entry key for a credential.
fn credential_key(account_id: AccountId, credential_type: &str) -> String {
    format!("{SERVICE_NAME}_{credential_type}_{}", account_id.0)
}

/// Credential store backed by the system keyring.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    /// Creates the keyring-backed store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, account_id: AccountId) -> CredentialResult<Option<Credential>> {
        let key = credential_key(account_id, IMAP_CREDENTIAL);
        let entry = Entry::new(SERVICE_NAME, &key)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(Credential::new(secret))),
            Err(keyring::Error::NoEntry) => {
                debug!("No mailbox credential found for account {}", account_id.0);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, account_id: AccountId, credential: &Credential) -> CredentialResult<()> {
        let key = credential_key(account_id, IMAP_CREDENTIAL);
        let entry = Entry::new(SERVICE_NAME, &key)?;
        entry.set_password(&credential.secret)?;
        debug!("Stored mailbox credential for account {}", account_id.0);
        Ok(())
    }

    fn delete(&self, account_id: AccountId) -> CredentialResult<()> {
        let key = credential_key(account_id, IMAP_CREDENTIAL);
        let entry = Entry::new(SERVICE_NAME, &key)?;
        match entry.delete_credential() {
            Ok(()) => {
                debug!("Deleted mailbox credential for account {}", account_id.0);
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!(
                    "No mailbox credential to delete for account {}",
                    account_id.0
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory credential store for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<AccountId, Credential>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with one credential.
    #[must_use]
    pub fn with_credential(account_id: AccountId, credential: Credential) -> Self {
        let store = Self::new();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(account_id, credential);
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, account_id: AccountId) -> CredentialResult<Option<Credential>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entries.get(&account_id).cloned())
    }

    fn put(&self, account_id: AccountId, credential: &Credential) -> CredentialResult<()> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(account_id, credential.clone());
        Ok(())
    }

    fn delete(&self, account_id: AccountId) -> CredentialResult<()> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.remove(&account_id);
        Ok(())
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
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("hunter2");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        let id = AccountId::new(1);

        assert!(store.get(id).unwrap().is_none());

        store.put(id, &Credential::new("app-password")).unwrap();
        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.secret, "app-password");

        store.delete(id).unwrap();
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn test_memory_store_put_replaces() {
        let store = MemoryCredentialStore::with_credential(AccountId::new(7), Credential::new("old"));

        store.put(AccountId::new(7), &Credential::new("new")).unwrap();
        assert_eq!(store.get(AccountId::new(7)).unwrap().unwrap().secret, "new");
    }

    #[test]
    fn test_memory_store_delete_is_idempotent() {
        let store = MemoryCredentialStore::new();
        store.delete(AccountId::new(42)).unwrap();
        store.delete(AccountId::new(42)).unwrap();
    }

    // Note: These tests interact with the actual system keyring.
    // They are marked as ignored by default to avoid polluting the keyring
    // during automated testing. Run manually with `cargo test -- --ignored`

    #[test]
    #[ignore = "requires system keyring"]
    fn test_keyring_store_round_trip() {
        let store = KeyringCredentialStore::new();
        let id = AccountId::new(99999); // Use high ID to avoid conflicts

        store.put(id, &Credential::new("test_password_12345")).unwrap();

        let loaded = store.get(id).unwrap();
        assert_eq!(loaded, Some(Credential::new("test_password_12345")));

        store.delete(id).unwrap();
        assert_eq!(store.get(id).unwrap(), None);
    }

    #[test]
    #[ignore = "requires system keyring"]
    fn test_keyring_delete_missing_entry() {
        let store = KeyringCredentialStore::new();
        store.delete(AccountId::new(99998)).unwrap();
    }
}
