//! Account management module.
//!
//! Provides the monitored-account model and credential storage.

pub mod credentials;
mod model;

pub use credentials::{
    Credential, CredentialError, CredentialResult, CredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use model::{Account, AccountId, ImapEndpoint, Security};
