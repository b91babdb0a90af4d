//! Token endpoint exchanges and the UserInfo fetch.
//!
//! Every token set leaving this module has been through
//! [`IdTokenVerifier::verify_set`]; a set whose ID token fails verification
//! is dropped here and surfaces as `OidcError::InvalidToken`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, warn};

use super::redirect::ImplicitTokens;
use super::token::{IdTokenVerifier, TokenSet, VerifiedTokenSet};
use crate::config::ClientConfig;
use crate::error::OidcError;
use crate::net::{HttpRequest, HttpResponse, HttpTransport};

/// Error code the token endpoint uses for a dead refresh token.
const INVALID_GRANT: &str = "invalid_grant";

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl From<TokenResponse> for TokenSet {
    fn from(r: TokenResponse) -> Self {
        TokenSet {
            id_token: r.id_token,
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: r.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: r.expires_in,
            scope: r.scope,
        }
    }
}

/// Error response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Map a non-2xx token endpoint response to an error.
///
/// `invalid_grant` is recognised by status 400 plus the code appearing in the
/// body, so providers that answer with a plain-text body are still caught.
fn map_token_error(response: &HttpResponse) -> OidcError {
    let parsed = serde_json::from_str::<TokenErrorResponse>(&response.body).ok();
    if let Some(error) = &parsed {
        warn!(
            status = response.status,
            error = %error.error,
            description = ?error.error_description,
            "Token endpoint returned an error"
        );
    } else {
        warn!(status = response.status, "Token endpoint returned an error");
    }

    if response.status == 400 && response.body.contains(INVALID_GRANT) {
        let detail = parsed
            .and_then(|e| e.error_description)
            .unwrap_or_else(|| INVALID_GRANT.to_string());
        return OidcError::InvalidGrant(detail);
    }

    let detail = match parsed {
        Some(e) => e.error_description.unwrap_or(e.error),
        None => response.body.clone(),
    };
    OidcError::Transport(format!(
        "token endpoint returned HTTP {}: {}",
        response.status, detail
    ))
}

/// Exchanges authorization artifacts and refresh tokens for verified token sets.
#[derive(Clone)]
pub struct TokenExchanger {
    client: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    verifier: IdTokenVerifier,
}

impl std::fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("client_id", &self.client.client_id)
            .field("token_endpoint", &self.client.token_endpoint)
            .field("verifier", &self.verifier)
            .finish()
    }
}

impl TokenExchanger {
    /// Create an exchanger, validating the config and loading any ID token key.
    pub fn new(client: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, OidcError> {
        client.validate()?;
        let verifier = IdTokenVerifier::from_config(&client)?;
        Ok(Self {
            client,
            transport,
            verifier,
        })
    }

    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    /// `true` when `id_token` is meant for this client and well-formed.
    pub fn verify(&self, id_token: &str) -> bool {
        self.verifier.verify(id_token)
    }

    /// Exchange an authorization code (code or hybrid flow).
    pub async fn exchange_code(&self, code: &str) -> Result<VerifiedTokenSet, OidcError> {
        debug!("Exchanging authorization code for tokens");

        let tokens = self
            .request_tokens(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.client.redirect_uri.as_str()),
            ])
            .await?;

        let verified = self.verifier.verify_set(tokens, true)?;
        debug!("Authorization code exchange successful");
        Ok(verified)
    }

    /// Complete a hybrid-flow redirect.
    ///
    /// The front-channel ID token must verify before the code is spent. If
    /// the token endpoint omits an ID token the front-channel one is kept.
    pub async fn exchange_hybrid(
        &self,
        code: &str,
        front_channel_id_token: &str,
    ) -> Result<VerifiedTokenSet, OidcError> {
        self.verifier.check(front_channel_id_token)?;

        debug!("Exchanging hybrid-flow code for tokens");
        let mut tokens = self
            .request_tokens(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.client.redirect_uri.as_str()),
            ])
            .await?;
        if tokens.id_token.is_none() {
            tokens.id_token = Some(front_channel_id_token.to_string());
        }

        self.verifier.verify_set(tokens, true)
    }

    /// Accept the tokens of an implicit-flow redirect.
    pub fn accept_implicit(&self, tokens: ImplicitTokens) -> Result<VerifiedTokenSet, OidcError> {
        self.verifier.verify_set(tokens.into_token_set(), true)
    }

    /// Exchange a refresh token for a fresh token set.
    ///
    /// The scopes are sent again since some providers drop them otherwise.
    /// The ID token is verified when the response carries one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<VerifiedTokenSet, OidcError> {
        debug!("Refreshing tokens");

        let scope = self.client.scope_param();
        let tokens = self
            .request_tokens(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", scope.as_str()),
            ])
            .await?;

        let verified = self.verifier.verify_set(tokens, false)?;
        debug!(has_id_token = verified.id_token.is_some(), "Token refresh successful");
        Ok(verified)
    }

    /// Fetch the UserInfo claims using the ID token as bearer.
    pub async fn user_info(
        &self,
        id_token: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, OidcError> {
        if self.client.userinfo_endpoint.is_empty() {
            return Err(OidcError::Config(
                "no userinfo endpoint configured".to_string(),
            ));
        }

        let request = HttpRequest::get(&self.client.userinfo_endpoint)
            .header("Authorization", format!("Bearer {id_token}"))
            .header("Accept", "application/json");
        let response = self.transport.execute(request).await?;

        if !response.is_success() {
            return Err(OidcError::Transport(format!(
                "userinfo endpoint returned HTTP {} {}",
                response.status, response.reason
            )));
        }

        serde_json::from_str(&response.body)
            .map_err(|e| OidcError::Transport(format!("Failed to parse userinfo response: {e}")))
    }

    /// POST a token request and parse the response, without verification.
    async fn request_tokens(&self, form: &[(&str, &str)]) -> Result<TokenSet, OidcError> {
        let mut pairs: Vec<(&str, &str)> = form.to_vec();
        let mut request = HttpRequest::post(&self.client.token_endpoint)
            .header("Accept", "application/json");

        match self.client.client_secret() {
            Some(secret) => {
                let credentials = STANDARD.encode(format!("{}:{}", self.client.client_id, secret));
                request = request.header("Authorization", format!("Basic {credentials}"));
            }
            None => pairs.push(("client_id", self.client.client_id.as_str())),
        }

        let response = self.transport.execute(request.form(&pairs)).await?;
        if !response.is_success() {
            return Err(map_token_error(&response));
        }

        let parsed: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| OidcError::Transport(format!("Failed to parse token response: {e}")))?;
        Ok(parsed.into())
    }
}
