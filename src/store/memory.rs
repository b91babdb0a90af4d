//! In-memory credential store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::instrument;

use super::{AccountHandle, CredentialStore, unknown_account};
use crate::error::OidcError;
use crate::oidc::TokenKind;

#[derive(Debug, Clone, Default)]
struct AccountSlots {
    account_type: String,
    tokens: HashMap<TokenKind, String>,
}

/// In-memory credential store.
///
/// Uses `Arc<RwLock<HashMap>>` for thread-safe access. Clones share the
/// same accounts.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<HashMap<String, AccountSlots>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one account holding the given slots.
    pub fn with_account(name: &str, account_type: &str, tokens: &[(TokenKind, &str)]) -> Self {
        let slots = AccountSlots {
            account_type: account_type.to_string(),
            tokens: tokens
                .iter()
                .map(|(kind, value)| (*kind, value.to_string()))
                .collect(),
        };
        let mut map = HashMap::new();
        map.insert(name.to_string(), slots);
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> OidcError {
    OidcError::Storage("credential store lock poisoned".to_string())
}

impl CredentialStore for MemoryCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str, kind: TokenKind) -> Result<Option<String>, OidcError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map
            .get(account)
            .and_then(|slots| slots.tokens.get(&kind))
            .cloned())
    }

    #[instrument(skip(self, value))]
    fn set(&self, account: &str, kind: TokenKind, value: &str) -> Result<(), OidcError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        let slots = map.get_mut(account).ok_or_else(|| unknown_account(account))?;
        slots.tokens.insert(kind, value.to_string());
        Ok(())
    }

    #[instrument(skip(self))]
    fn invalidate(&self, account: &str, kind: TokenKind) -> Result<(), OidcError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        if let Some(slots) = map.get_mut(account) {
            slots.tokens.remove(&kind);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn create_account(&self, name: &str, account_type: &str) -> Result<AccountHandle, OidcError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        let slots = map.entry(name.to_string()).or_insert_with(|| AccountSlots {
            account_type: account_type.to_string(),
            tokens: HashMap::new(),
        });
        Ok(AccountHandle {
            name: name.to_string(),
            account_type: slots.account_type.clone(),
        })
    }

    fn account_exists(&self, name: &str) -> Result<bool, OidcError> {
        Ok(self.inner.read().map_err(poisoned)?.contains_key(name))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
