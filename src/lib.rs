pub mod account;
pub mod config;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod net;
pub mod oidc;
pub mod store;

pub use crate::config::{ClientConfig, Config, FlowType};
pub use crate::error::{OidcError, Result};
pub use crate::guard::ApiRequestGuard;
pub use crate::lifecycle::{
    AuthToken, AuthorizationOutcome, AuthorizationRequest, AuthorizationUi, TokenLifecycleManager,
    TokenState,
};
pub use crate::oidc::{AuthorizationResult, TokenExchanger, TokenKind, TokenSet};
pub use crate::store::{AccountHandle, CredentialStore};

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::net::{HttpClient, HttpTransport};

/// The wired-up authenticator: one transport, one store, one lifecycle
/// manager and the API guard on top.
#[derive(Clone, Debug)]
pub struct Authenticator {
    pub lifecycle: Arc<TokenLifecycleManager>,
    pub guard: ApiRequestGuard,
}

impl Authenticator {
    /// Build from application config using the reqwest transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(HttpClient::from_config(&config.http));
        let store = store::from_config(&config.storage, &config.account.account_type)?;
        Self::with_parts(config, transport, store)
    }

    /// Build with an explicit transport and credential store.
    pub fn with_parts(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let exchanger = TokenExchanger::new(config.client.clone(), transport.clone())?;
        let lifecycle = Arc::new(TokenLifecycleManager::new(
            exchanger,
            store,
            config.account.clone(),
        ));
        let guard = ApiRequestGuard::new(lifecycle.clone(), transport);
        Ok(Self { lifecycle, guard })
    }

    /// Guarded GET returning a JSON object.
    pub async fn get_json(&self, account: &str, url: &str) -> Result<Map<String, Value>> {
        self.guard.get_json(account, url).await
    }

    /// Guarded request returning the raw body.
    pub async fn make_request(
        &self,
        account: &str,
        method: reqwest::Method,
        url: &str,
    ) -> Result<String> {
        self.guard.make_request(account, method, url).await
    }

    /// Token for `account`, or the authorization the user has to complete.
    pub async fn get_auth_token(&self, account: &str, kind: TokenKind) -> Result<AuthToken> {
        self.lifecycle.get_auth_token(account, kind).await
    }

    /// Run an interactive authorization through `ui`.
    pub async fn authorize(
        &self,
        ui: &dyn AuthorizationUi,
        account: Option<&str>,
    ) -> Result<AccountHandle> {
        self.lifecycle.authorize(ui, account).await
    }
}
