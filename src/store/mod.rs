//! Credential store: per-account token slots.
//!
//! Provides the [`CredentialStore`] trait and its backends:
//! - [`FileCredentialStore`] - One JSON file per account
//! - [`MemoryCredentialStore`] - In-memory storage for tests
//! - [`KeyringCredentialStore`] - System keyring (requires `system-keyring` feature)
//!
//! Each account holds three opaque string slots keyed by [`TokenKind::key`].
//! Single-slot reads and writes are atomic; writes across slots are not.

pub mod file;
pub mod keyring;
pub mod memory;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::OidcError;
use crate::oidc::TokenKind;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

#[cfg(feature = "system-keyring")]
pub use keyring::KeyringCredentialStore;

/// An account known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountHandle {
    pub name: String,
    pub account_type: String,
}

/// Trait for credential store backends.
///
/// All implementations must be thread-safe (`Send + Sync`). Account
/// creation belongs to the store; the core only reads and writes slots.
pub trait CredentialStore: Send + Sync {
    /// Read one token slot.
    fn get(&self, account: &str, kind: TokenKind) -> Result<Option<String>, OidcError>;

    /// Overwrite one token slot. The account must exist.
    fn set(&self, account: &str, kind: TokenKind, value: &str) -> Result<(), OidcError>;

    /// Clear one token slot. Clearing an empty slot is not an error.
    fn invalidate(&self, account: &str, kind: TokenKind) -> Result<(), OidcError>;

    /// Create an account, or return the existing one with the same name.
    fn create_account(&self, name: &str, account_type: &str) -> Result<AccountHandle, OidcError>;

    fn account_exists(&self, name: &str) -> Result<bool, OidcError>;

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn get(&self, account: &str, kind: TokenKind) -> Result<Option<String>, OidcError> {
        (**self).get(account, kind)
    }
    fn set(&self, account: &str, kind: TokenKind, value: &str) -> Result<(), OidcError> {
        (**self).set(account, kind, value)
    }
    fn invalidate(&self, account: &str, kind: TokenKind) -> Result<(), OidcError> {
        (**self).invalidate(account, kind)
    }
    fn create_account(&self, name: &str, account_type: &str) -> Result<AccountHandle, OidcError> {
        (**self).create_account(name, account_type)
    }
    fn account_exists(&self, name: &str) -> Result<bool, OidcError> {
        (**self).account_exists(name)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// Blanket implementation for Box<T>
impl<T: CredentialStore + ?Sized> CredentialStore for Box<T> {
    fn get(&self, account: &str, kind: TokenKind) -> Result<Option<String>, OidcError> {
        (**self).get(account, kind)
    }
    fn set(&self, account: &str, kind: TokenKind, value: &str) -> Result<(), OidcError> {
        (**self).set(account, kind, value)
    }
    fn invalidate(&self, account: &str, kind: TokenKind) -> Result<(), OidcError> {
        (**self).invalidate(account, kind)
    }
    fn create_account(&self, name: &str, account_type: &str) -> Result<AccountHandle, OidcError> {
        (**self).create_account(name, account_type)
    }
    fn account_exists(&self, name: &str) -> Result<bool, OidcError> {
        (**self).account_exists(name)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the backend selected by `[storage]`.
pub fn from_config(
    config: &StorageConfig,
    account_type: &str,
) -> Result<Arc<dyn CredentialStore>, OidcError> {
    match config.backend {
        StorageBackend::File => Ok(Arc::new(FileCredentialStore::new(&config.dir))),
        StorageBackend::Memory => Ok(Arc::new(MemoryCredentialStore::new())),
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => Ok(Arc::new(KeyringCredentialStore::with_service(
            account_type,
        ))),
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => {
            let _ = account_type;
            Err(OidcError::Config(
                "keyring storage requires the system-keyring feature".to_string(),
            ))
        }
    }
}

pub(crate) fn unknown_account(account: &str) -> OidcError {
    OidcError::Storage(format!("Account '{account}' does not exist"))
}
