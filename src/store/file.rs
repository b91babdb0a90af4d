//! File-based credential store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{AccountHandle, CredentialStore, unknown_account};
use crate::error::OidcError;
use crate::oidc::TokenKind;

/// File permissions for account files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// On-disk layout of one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountFile {
    name: String,
    account_type: String,
    /// Slot key (see [`TokenKind::key`]) to token.
    #[serde(default)]
    tokens: BTreeMap<String, String>,
}

/// File-based credential store.
///
/// Each account is one JSON file in a configurable directory. File name is
/// the base64url-encoded account name, since display names contain spaces
/// and parentheses.
///
/// # Security
/// - File permissions are set to 0600 (owner read/write only) on Unix
/// - Parent directories are created with 0700 permissions
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the directory where accounts are stored.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn account_path(&self, account: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(account.as_bytes())))
    }

    fn ensure_dir(&self) -> Result<(), OidcError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| {
                OidcError::Storage(format!(
                    "Failed to create account directory '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(DIR_MODE);
                std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                    OidcError::Storage(format!(
                        "Failed to set directory permissions on '{}': {}",
                        self.dir.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn read(&self, account: &str) -> Result<Option<AccountFile>, OidcError> {
        let path = self.account_path(account);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OidcError::Storage(format!(
                    "Failed to read account file '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        let file = serde_json::from_str(&content).map_err(|e| {
            OidcError::Storage(format!(
                "Failed to parse account file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(file))
    }

    /// Write to a temp file, then rename over the target.
    fn write(&self, file: &AccountFile) -> Result<(), OidcError> {
        self.ensure_dir()?;

        let path = self.account_path(&file.name);
        let content = serde_json::to_string_pretty(file)
            .map_err(|e| OidcError::Storage(format!("Failed to serialize account: {e}")))?;
        let temp_path = path.with_extension("tmp");

        // 0600 at creation so the tokens are never world-readable.
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut out = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| {
                    OidcError::Storage(format!(
                        "Failed to create temp file '{}': {}",
                        temp_path.display(),
                        e
                    ))
                })?;
            out.write_all(content.as_bytes())
                .and_then(|()| out.sync_all())
                .map_err(|e| {
                    OidcError::Storage(format!(
                        "Failed to write temp file '{}': {}",
                        temp_path.display(),
                        e
                    ))
                })?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, &content).map_err(|e| {
                OidcError::Storage(format!(
                    "Failed to write temp file '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if let Err(e) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(OidcError::Storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, OidcError> {
        self.write_lock
            .lock()
            .map_err(|_| OidcError::Storage("credential store lock poisoned".to_string()))
    }
}

impl CredentialStore for FileCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str, kind: TokenKind) -> Result<Option<String>, OidcError> {
        Ok(self
            .read(account)?
            .and_then(|mut file| file.tokens.remove(kind.key())))
    }

    #[instrument(skip(self, value))]
    fn set(&self, account: &str, kind: TokenKind, value: &str) -> Result<(), OidcError> {
        let _guard = self.lock()?;
        let mut file = self.read(account)?.ok_or_else(|| unknown_account(account))?;
        file.tokens.insert(kind.key().to_string(), value.to_string());
        self.write(&file)
    }

    #[instrument(skip(self))]
    fn invalidate(&self, account: &str, kind: TokenKind) -> Result<(), OidcError> {
        let _guard = self.lock()?;
        let Some(mut file) = self.read(account)? else {
            return Ok(());
        };
        if file.tokens.remove(kind.key()).is_some() {
            self.write(&file)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn create_account(&self, name: &str, account_type: &str) -> Result<AccountHandle, OidcError> {
        let _guard = self.lock()?;
        if let Some(existing) = self.read(name)? {
            return Ok(AccountHandle {
                name: existing.name,
                account_type: existing.account_type,
            });
        }

        let file = AccountFile {
            name: name.to_string(),
            account_type: account_type.to_string(),
            tokens: BTreeMap::new(),
        };
        self.write(&file)?;
        Ok(AccountHandle {
            name: file.name,
            account_type: file.account_type,
        })
    }

    fn account_exists(&self, name: &str) -> Result<bool, OidcError> {
        Ok(self.account_path(name).exists())
    }

    fn name(&self) -> &str {
        "file"
    }
}
