//! Bearer-authenticated API calls with one retry after a refresh.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::OidcError;
use crate::lifecycle::{AuthToken, TokenLifecycleManager};
use crate::net::{HttpRequest, HttpTransport};
use crate::oidc::TokenKind;

/// At most the original call plus one retry.
const MAX_ATTEMPTS: usize = 2;

/// Injects the account's ID token into API calls.
///
/// A 401 or 403 on the first attempt replaces the token through the
/// lifecycle manager and retries once. Any other failure, or a second
/// rejection, is returned as `OidcError::UnrecoverableApi`.
#[derive(Clone)]
pub struct ApiRequestGuard {
    lifecycle: Arc<TokenLifecycleManager>,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for ApiRequestGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequestGuard")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl ApiRequestGuard {
    pub fn new(lifecycle: Arc<TokenLifecycleManager>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            lifecycle,
            transport,
        }
    }

    pub fn lifecycle(&self) -> &Arc<TokenLifecycleManager> {
        &self.lifecycle
    }

    /// Issue `method url` on behalf of `account` and return the body.
    pub async fn call(&self, method: Method, url: &str, account: &str) -> Result<String, OidcError> {
        let mut token = match self.lifecycle.get_auth_token(account, TokenKind::Id).await? {
            AuthToken::Token(token) => token,
            AuthToken::ReauthorizationRequired(_) => {
                return Err(OidcError::ReauthorizationRequired {
                    account: account.to_string(),
                });
            }
        };

        let mut attempt = 1;
        loop {
            let request = HttpRequest::new(method.clone(), url)
                .header("Authorization", format!("Bearer {token}"))
                .header("Accept", "application/json");
            let response = self.transport.execute(request).await?;

            if response.is_success() {
                debug!(%method, url, status = response.status, attempt, "API call succeeded");
                return Ok(response.body);
            }

            let rejected = matches!(response.status, 401 | 403);
            if rejected && attempt < MAX_ATTEMPTS {
                warn!(
                    %method,
                    url,
                    status = response.status,
                    "API rejected ID token; refreshing and retrying once"
                );
                token = self.lifecycle.renew(account, &token).await?;
                attempt += 1;
                continue;
            }

            warn!(%method, url, status = response.status, attempt, "API call failed");
            return Err(OidcError::UnrecoverableApi {
                status: response.status,
                message: response.reason,
            });
        }
    }

    /// Guarded call with an arbitrary method.
    pub async fn make_request(
        &self,
        account: &str,
        method: Method,
        url: &str,
    ) -> Result<String, OidcError> {
        self.call(method, url, account).await
    }

    /// Guarded GET whose body is a JSON object.
    pub async fn get_json(&self, account: &str, url: &str) -> Result<Map<String, Value>, OidcError> {
        let body = self.call(Method::GET, url, account).await?;
        serde_json::from_str(&body)
            .map_err(|e| OidcError::Transport(format!("Failed to parse JSON response: {e}")))
    }
}
