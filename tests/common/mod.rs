//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;

use oidc_account::config::{Config, FlowType, StorageBackend};
use oidc_account::{AuthorizationOutcome, AuthorizationRequest, AuthorizationUi, OidcError};

pub const CLIENT_ID: &str = "foobar";
pub const SUBJECT: &str = "248289761001";
pub const REDIRECT_URI: &str = "app://oidcsample.example.com";

/// Unsigned JWT for `client_id`, expiring `exp_offset` seconds from now.
pub fn id_token(client_id: &str, exp_offset: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none", "typ": "JWT"}).to_string());
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "iss": "https://idp.example.com",
            "sub": SUBJECT,
            "aud": client_id,
            "exp": now + exp_offset,
            "iat": now,
        })
        .to_string(),
    );
    format!("{header}.{payload}.sig")
}

/// Config pointing every endpoint at the mock server.
pub fn config(server_uri: &str, flow: FlowType) -> Config {
    let mut config = Config::default();
    config.client.client_id = CLIENT_ID.to_string();
    config.client.client_secret = Some("xyzzy".to_string());
    config.client.authorization_endpoint = format!("{server_uri}/oauth2/authorize");
    config.client.token_endpoint = format!("{server_uri}/oauth2/token");
    config.client.userinfo_endpoint = format!("{server_uri}/oauth2/userinfo");
    config.client.redirect_uri = REDIRECT_URI.to_string();
    config.client.flow_type = flow;
    config.storage.backend = StorageBackend::Memory;
    config
}

pub fn token_response(id_token: Option<&str>, refresh_token: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "access_token": "SlAV32hkKG",
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if let Some(id) = id_token {
        body["id_token"] = json!(id);
    }
    if let Some(rt) = refresh_token {
        body["refresh_token"] = json!(rt);
    }
    body
}

/// UI that answers with a fixed outcome and records what it was shown.
pub struct ScriptedUi {
    outcome: AuthorizationOutcome,
    pub requests: Mutex<Vec<AuthorizationRequest>>,
}

impl ScriptedUi {
    pub fn new(outcome: AuthorizationOutcome) -> Self {
        Self {
            outcome,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuthorizationUi for ScriptedUi {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, OidcError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.outcome.clone())
    }
}
