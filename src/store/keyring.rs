//! Keyring-based credential store.

#[cfg(feature = "system-keyring")]
use tracing::instrument;

#[cfg(feature = "system-keyring")]
use super::{AccountHandle, CredentialStore, unknown_account};
#[cfg(feature = "system-keyring")]
use crate::error::OidcError;
#[cfg(feature = "system-keyring")]
use crate::oidc::TokenKind;

/// Keyring-based credential store.
///
/// Uses the system's native credential store. Every token slot is its own
/// entry (`{account}/{slot key}`) under the service name, plus one marker
/// entry per account holding the account type.
///
/// Feature-gated behind `system-keyring`.
#[cfg(feature = "system-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

#[cfg(feature = "system-keyring")]
impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-keyring")]
impl KeyringCredentialStore {
    const SERVICE_NAME: &str = "oidc-account";
    const ACCOUNT_MARKER: &str = "oidc_account.ACCOUNT_TYPE";

    pub fn new() -> Self {
        Self::with_service(Self::SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str, key: &str) -> Result<keyring::Entry, OidcError> {
        keyring::Entry::new(&self.service, &format!("{account}/{key}"))
            .map_err(|e| OidcError::Storage(format!("Failed to create keyring entry: {e}")))
    }

    fn read(&self, account: &str, key: &str) -> Result<Option<String>, OidcError> {
        match self.entry(account, key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(OidcError::Storage(format!("Keyring error: {e}"))),
        }
    }

    fn write(&self, account: &str, key: &str, value: &str) -> Result<(), OidcError> {
        self.entry(account, key)?
            .set_password(value)
            .map_err(|e| OidcError::Storage(format!("Keyring error: {e}")))
    }
}

#[cfg(feature = "system-keyring")]
impl CredentialStore for KeyringCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str, kind: TokenKind) -> Result<Option<String>, OidcError> {
        self.read(account, kind.key())
    }

    #[instrument(skip(self, value))]
    fn set(&self, account: &str, kind: TokenKind, value: &str) -> Result<(), OidcError> {
        if !self.account_exists(account)? {
            return Err(unknown_account(account));
        }
        self.write(account, kind.key(), value)
    }

    #[instrument(skip(self))]
    fn invalidate(&self, account: &str, kind: TokenKind) -> Result<(), OidcError> {
        match self.entry(account, kind.key())?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(OidcError::Storage(format!("Keyring error: {e}"))),
        }
    }

    #[instrument(skip(self))]
    fn create_account(&self, name: &str, account_type: &str) -> Result<AccountHandle, OidcError> {
        if let Some(existing) = self.read(name, Self::ACCOUNT_MARKER)? {
            return Ok(AccountHandle {
                name: name.to_string(),
                account_type: existing,
            });
        }
        self.write(name, Self::ACCOUNT_MARKER, account_type)?;
        Ok(AccountHandle {
            name: name.to_string(),
            account_type: account_type.to_string(),
        })
    }

    fn account_exists(&self, name: &str) -> Result<bool, OidcError> {
        Ok(self.read(name, Self::ACCOUNT_MARKER)?.is_some())
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
