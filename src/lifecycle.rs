//! Token lifecycle manager.
//!
//! Decides per account whether a cached token can be handed out, whether a
//! refresh is needed, or whether the user has to authorize again:
//!
//! ```text
//! NoToken ──(no refresh token)──────────────> NeedsReauthorization
//! NoToken ──(refresh token present)─────────> NeedsRefresh
//! NeedsRefresh ──(refresh ok)───────────────> HasValidToken
//! NeedsRefresh ──(invalid_grant)────────────> NeedsReauthorization
//! NeedsRefresh ──(any other failure)────────> NeedsRefresh, error returned
//! authorization completed ──────────────────> HasValidToken
//! ```
//!
//! Refreshes are serialized per account; a caller that waited for another
//! caller's refresh re-reads the store instead of refreshing again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::account::account_name;
use crate::config::{AccountConfig, FlowType};
use crate::error::OidcError;
use crate::oidc::{
    AuthorizationResult, TokenExchanger, TokenKind, VerifiedTokenSet,
    build_authorization_url_with_state, is_usable_id_token,
};
use crate::store::{AccountHandle, CredentialStore};

/// Per-account token state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    HasValidToken,
    NeedsRefresh,
    NeedsReauthorization,
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoToken => write!(f, "no_token"),
            Self::HasValidToken => write!(f, "has_valid_token"),
            Self::NeedsRefresh => write!(f, "needs_refresh"),
            Self::NeedsReauthorization => write!(f, "needs_reauthorization"),
        }
    }
}

/// Everything the interactive UI needs to run an authorization.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub flow: FlowType,
    /// Existing account being re-authorized, if any.
    pub account: Option<String>,
    pub state: Option<String>,
}

/// Result of [`TokenLifecycleManager::get_auth_token`].
#[derive(Debug, Clone, PartialEq)]
pub enum AuthToken {
    Token(String),
    /// No usable token; the user has to go through this authorization.
    ReauthorizationRequired(AuthorizationRequest),
}

/// What the interactive UI came back with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    /// The provider redirected to the configured redirect URI.
    Redirected(String),
    /// The user dismissed the UI.
    Cancelled,
}

/// The interactive authorization collaborator (browser, web view, terminal).
#[async_trait]
pub trait AuthorizationUi: Send + Sync {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, OidcError>;
}

/// Orchestrates cached tokens, refreshes and re-authorization.
pub struct TokenLifecycleManager {
    exchanger: TokenExchanger,
    store: Arc<dyn CredentialStore>,
    account: AccountConfig,
    states: RwLock<HashMap<String, TokenState>>,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("exchanger", &self.exchanger)
            .field("store", &self.store.name())
            .field("account", &self.account)
            .finish()
    }
}

impl TokenLifecycleManager {
    pub fn new(
        exchanger: TokenExchanger,
        store: Arc<dyn CredentialStore>,
        account: AccountConfig,
    ) -> Self {
        Self {
            exchanger,
            store,
            account,
            states: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn exchanger(&self) -> &TokenExchanger {
        &self.exchanger
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Last recorded state of `account`; `NoToken` until it has been evaluated.
    pub fn state(&self, account: &str) -> TokenState {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .copied()
            .unwrap_or(TokenState::NoToken)
    }

    fn set_state(&self, account: &str, state: TokenState) {
        let previous = self
            .states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.to_string(), state);
        if previous != Some(state) {
            info!(account, from = ?previous, to = %state, "Token state changed");
        }
    }

    fn refresh_lock(&self, account: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(account.to_string())
            .or_default()
            .clone()
    }

    /// Authorization request for the configured flow.
    pub fn authorization_request(
        &self,
        account: Option<&str>,
    ) -> Result<AuthorizationRequest, OidcError> {
        self.authorization_request_with_state(account, None)
    }

    pub fn authorization_request_with_state(
        &self,
        account: Option<&str>,
        state: Option<&str>,
    ) -> Result<AuthorizationRequest, OidcError> {
        let client = self.exchanger.client();
        let flow = client.flow_type;
        Ok(AuthorizationRequest {
            url: build_authorization_url_with_state(client, flow, state)?,
            flow,
            account: account.map(String::from),
            state: state.map(String::from),
        })
    }

    /// A cached token that may be handed out. Expired ID tokens count as absent.
    fn cached(&self, account: &str, kind: TokenKind) -> Result<Option<String>, OidcError> {
        let token = self.store.get(account, kind)?.filter(|t| !t.is_empty());
        match token {
            Some(t) if kind == TokenKind::Id && !is_usable_id_token(&t) => {
                debug!(account, "Cached ID token has expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn reauthorization(&self, account: &str) -> Result<AuthToken, OidcError> {
        self.set_state(account, TokenState::NeedsReauthorization);
        Ok(AuthToken::ReauthorizationRequired(
            self.authorization_request(Some(account))?,
        ))
    }

    /// Get a token of `kind` for `account`, refreshing if necessary.
    ///
    /// Returns [`AuthToken::ReauthorizationRequired`] when only interactive
    /// authorization can produce a token. Refresh failures other than
    /// `invalid_grant` are returned as errors and leave the account in
    /// `NeedsRefresh`.
    pub async fn get_auth_token(
        &self,
        account: &str,
        kind: TokenKind,
    ) -> Result<AuthToken, OidcError> {
        if let Some(token) = self.cached(account, kind)? {
            self.set_state(account, TokenState::HasValidToken);
            return Ok(AuthToken::Token(token));
        }

        if self.cached(account, TokenKind::Refresh)?.is_none() {
            debug!(account, %kind, "No cached token and no refresh token");
            return self.reauthorization(account);
        }
        self.set_state(account, TokenState::NeedsRefresh);

        let lock = self.refresh_lock(account);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached(account, kind)? {
            debug!(account, %kind, "Token refreshed by a concurrent caller");
            self.set_state(account, TokenState::HasValidToken);
            return Ok(AuthToken::Token(token));
        }
        let Some(refresh_token) = self.cached(account, TokenKind::Refresh)? else {
            return self.reauthorization(account);
        };

        match self.exchanger.refresh(&refresh_token).await {
            Ok(tokens) => {
                self.persist(account, &tokens, RefreshSlot::Keep)?;
                match tokens.get(kind) {
                    Some(token) => {
                        self.set_state(account, TokenState::HasValidToken);
                        Ok(AuthToken::Token(token.to_string()))
                    }
                    None => {
                        warn!(account, %kind, "Refresh response did not include the requested token");
                        Err(OidcError::InvalidToken(format!(
                            "refresh response carried no {kind} token"
                        )))
                    }
                }
            }
            Err(OidcError::InvalidGrant(detail)) => {
                warn!(account, detail = %detail, "Refresh token rejected; re-authorization required");
                self.store.invalidate(account, TokenKind::Refresh)?;
                self.reauthorization(account)
            }
            Err(e) => {
                warn!(account, error = %e, "Token refresh failed");
                self.set_state(account, TokenState::NeedsRefresh);
                Err(e)
            }
        }
    }

    /// Replace an ID token the API rejected and return a fresh one.
    ///
    /// The slot is only cleared if it still holds `rejected`, so concurrent
    /// callers rejected with the same token trigger a single refresh.
    pub async fn renew(&self, account: &str, rejected: &str) -> Result<String, OidcError> {
        {
            let lock = self.refresh_lock(account);
            let _guard = lock.lock().await;
            if self.store.get(account, TokenKind::Id)?.as_deref() == Some(rejected) {
                debug!(account, "Invalidating rejected ID token");
                self.store.invalidate(account, TokenKind::Id)?;
            }
        }

        match self.get_auth_token(account, TokenKind::Id).await? {
            AuthToken::Token(token) => Ok(token),
            AuthToken::ReauthorizationRequired(_) => Err(OidcError::ReauthorizationRequired {
                account: account.to_string(),
            }),
        }
    }

    /// Finish an interactive authorization and store its tokens.
    ///
    /// With `account` unset a name is derived from the ID token and UserInfo,
    /// and the account is created if it does not exist yet.
    pub async fn complete_authorization(
        &self,
        result: AuthorizationResult,
        account: Option<&str>,
    ) -> Result<AccountHandle, OidcError> {
        let tokens = match result {
            AuthorizationResult::Code(code) => self.exchanger.exchange_code(&code).await?,
            AuthorizationResult::HybridTokens { code, id_token } => {
                self.exchanger.exchange_hybrid(&code, &id_token).await?
            }
            AuthorizationResult::ImplicitTokens(implicit) => {
                self.exchanger.accept_implicit(implicit)?
            }
            AuthorizationResult::Error { code, description } => {
                if let Some(account) = account {
                    self.set_state(account, TokenState::NeedsReauthorization);
                }
                return Err(OidcError::AuthorizationFailed { code, description });
            }
            AuthorizationResult::Denied => {
                if let Some(account) = account {
                    self.set_state(account, TokenState::NeedsReauthorization);
                }
                return Err(OidcError::AuthorizationDenied);
            }
        };

        let name = match account {
            Some(name) => name.to_string(),
            None => self.derive_account_name(&tokens).await,
        };

        let handle = if self.store.account_exists(&name)? {
            AccountHandle {
                name: name.clone(),
                account_type: self.account.account_type.clone(),
            }
        } else {
            let handle = self.store.create_account(&name, &self.account.account_type)?;
            info!(account = %handle.name, "Created account");
            handle
        };

        self.persist(&handle.name, &tokens, RefreshSlot::Replace)?;
        self.set_state(&handle.name, TokenState::HasValidToken);
        Ok(handle)
    }

    /// Run the interactive authorization through `ui` and complete it.
    ///
    /// Cancellation writes nothing and leaves the account needing
    /// re-authorization.
    pub async fn authorize(
        &self,
        ui: &dyn AuthorizationUi,
        account: Option<&str>,
    ) -> Result<AccountHandle, OidcError> {
        let request = self.authorization_request(account)?;
        match ui.authorize(&request).await? {
            AuthorizationOutcome::Cancelled => {
                debug!(account = ?account, "Authorization cancelled by user");
                if let Some(account) = account {
                    self.set_state(account, TokenState::NeedsReauthorization);
                }
                Err(OidcError::AuthorizationCancelled)
            }
            AuthorizationOutcome::Redirected(uri) => {
                let result = AuthorizationResult::parse(&uri, request.flow)?;
                self.complete_authorization(result, account).await
            }
        }
    }

    async fn derive_account_name(&self, tokens: &VerifiedTokenSet) -> String {
        let user_info = match tokens.id_token.as_deref() {
            Some(id_token) => match self.exchanger.user_info(id_token).await {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(error = %e, "UserInfo request failed; naming account from ID token");
                    None
                }
            },
            None => None,
        };
        account_name(tokens.claims(), user_info.as_ref(), &self.account.app_name)
    }

    /// Overwrite the account's slots with a verified token set.
    ///
    /// A missing ID token clears the ID slot. A missing refresh token is
    /// handled according to `refresh`.
    fn persist(
        &self,
        account: &str,
        tokens: &VerifiedTokenSet,
        refresh: RefreshSlot,
    ) -> Result<(), OidcError> {
        match tokens.id_token.as_deref() {
            Some(id_token) => self.store.set(account, TokenKind::Id, id_token)?,
            None => self.store.invalidate(account, TokenKind::Id)?,
        }
        self.store
            .set(account, TokenKind::Access, &tokens.access_token)?;
        match (tokens.refresh_token.as_deref(), refresh) {
            (Some(refresh_token), _) => self.store.set(account, TokenKind::Refresh, refresh_token)?,
            (None, RefreshSlot::Keep) => {}
            (None, RefreshSlot::Replace) => self.store.invalidate(account, TokenKind::Refresh)?,
        }
        debug!(account, ?refresh, "Stored token set");
        Ok(())
    }
}

/// What `persist` does with the refresh slot when the new set has no
/// refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshSlot {
    /// Refresh responses may omit the token; the grant stays valid.
    Keep,
    /// A new authorization starts a new grant.
    Replace,
}
