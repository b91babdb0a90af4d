//! Token sets, token kinds and ID token verification.
//!
//! A [`TokenSet`] is whatever the provider handed back. Only a
//! [`VerifiedTokenSet`] (produced after the ID token passed audience,
//! expiry and issuer checks) may be persisted or returned to callers.

use std::ops::Deref;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::{ClientConfig, IdTokenKey};
use crate::error::OidcError;

/// Clock skew tolerated when checking `exp` and `iat`.
const ACCEPTABLE_SKEW_SECS: i64 = 300;

/// Safety margin applied when deciding whether a cached ID token is still usable.
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

// =============================================================================
// TokenKind
// =============================================================================

/// The three token slots kept per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Id,
    Access,
    Refresh,
}

impl TokenKind {
    pub const ALL: [TokenKind; 3] = [Self::Id, Self::Access, Self::Refresh];

    /// Key under which the slot is stored in the credential store.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Id => "oidc_account.TOKEN_TYPE_ID",
            Self::Access => "oidc_account.TOKEN_TYPE_ACCESS",
            Self::Refresh => "oidc_account.TOKEN_TYPE_REFRESH",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id => write!(f, "id"),
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

impl FromStr for TokenKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "id" | "id_token" => Ok(Self::Id),
            "access" | "access_token" => Ok(Self::Access),
            "refresh" | "refresh_token" => Ok(Self::Refresh),
            _ => Err(format!("Unknown token kind: {s}")),
        }
    }
}

// =============================================================================
// TokenSet
// =============================================================================

/// Tokens returned by the provider in one exchange.
///
/// Never mutated after creation; a refresh produces a new set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// JWT ID token. Always present after a code exchange or implicit flow,
    /// optional on refresh.
    pub id_token: Option<String>,
    pub access_token: String,
    /// Absent in the implicit flow.
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenSet {
    /// The token stored in the given slot, if the set carries one.
    pub fn get(&self, kind: TokenKind) -> Option<&str> {
        match kind {
            TokenKind::Id => self.id_token.as_deref(),
            TokenKind::Access => Some(self.access_token.as_str()),
            TokenKind::Refresh => self.refresh_token.as_deref(),
        }
    }
}

/// A token set whose ID token (if any) passed verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedTokenSet {
    tokens: TokenSet,
    claims: Option<IdTokenClaims>,
}

impl VerifiedTokenSet {
    /// Verified claims of the ID token, when the set has one.
    pub fn claims(&self) -> Option<&IdTokenClaims> {
        self.claims.as_ref()
    }

    pub fn into_inner(self) -> TokenSet {
        self.tokens
    }
}

impl Deref for VerifiedTokenSet {
    type Target = TokenSet;

    fn deref(&self) -> &TokenSet {
        &self.tokens
    }
}

// =============================================================================
// ID token claims
// =============================================================================

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::Single(aud) => aud == client_id,
            Self::Multiple(auds) => auds.iter().any(|a| a == client_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    #[serde(default)]
    pub sub: Option<String>,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub preferred_username: Option<String>,
}

impl IdTokenClaims {
    /// Whether the token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.exp <= chrono::Utc::now().timestamp() + EXPIRY_SAFETY_MARGIN_SECS
    }
}

/// Decode the payload of a JWT without checking anything.
pub fn decode_claims(id_token: &str) -> Result<IdTokenClaims, OidcError> {
    let mut parts = id_token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(OidcError::InvalidToken(
            "ID token is not a valid JWT (expected 3 parts)".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|e| OidcError::InvalidToken(format!("Failed to decode ID token payload: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| OidcError::InvalidToken(format!("Failed to parse ID token claims: {e}")))
}

/// Whether a stored ID token can still be handed out.
///
/// Tokens that cannot be decoded are passed through untouched; the API
/// decides whether to accept them.
pub fn is_usable_id_token(id_token: &str) -> bool {
    match decode_claims(id_token) {
        Ok(claims) => !claims.is_expired(),
        Err(_) => true,
    }
}

// =============================================================================
// IdTokenVerifier
// =============================================================================

/// Checks ID tokens against the configured client.
#[derive(Clone)]
pub struct IdTokenVerifier {
    client_id: String,
    issuer: Option<String>,
    key: Option<(DecodingKey, Algorithm)>,
}

impl std::fmt::Debug for IdTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenVerifier")
            .field("client_id", &self.client_id)
            .field("issuer", &self.issuer)
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

impl IdTokenVerifier {
    /// Build a verifier from the client config, loading key material if configured.
    pub fn from_config(client: &ClientConfig) -> Result<Self, OidcError> {
        let key = match &client.id_token_key {
            None => None,
            Some(IdTokenKey::Hs256 { secret }) => {
                Some((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256))
            }
            Some(IdTokenKey::Rs256 { public_key_path }) => {
                let pem = std::fs::read(public_key_path).map_err(|e| {
                    OidcError::Config(format!(
                        "Failed to read ID token key '{}': {e}",
                        public_key_path.display()
                    ))
                })?;
                let key = DecodingKey::from_rsa_pem(&pem)
                    .map_err(|e| OidcError::Config(format!("Invalid RSA public key: {e}")))?;
                Some((key, Algorithm::RS256))
            }
        };

        Ok(Self {
            client_id: client.client_id.clone(),
            issuer: client.issuer.clone(),
            key,
        })
    }

    /// Verifier that checks claims only.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            issuer: None,
            key: None,
        }
    }

    /// `true` when the token passes every check. Malformed tokens are
    /// reported as `false`, never as errors.
    pub fn verify(&self, id_token: &str) -> bool {
        match self.check(id_token) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "ID token rejected");
                false
            }
        }
    }

    /// Verify and return the claims.
    pub fn check(&self, id_token: &str) -> Result<IdTokenClaims, OidcError> {
        let claims = decode_claims(id_token)?;

        if !claims.aud.contains(&self.client_id) {
            return Err(OidcError::InvalidToken(format!(
                "Client ID '{}' not found in token audience",
                self.client_id
            )));
        }

        let now = chrono::Utc::now().timestamp();
        if claims.exp + ACCEPTABLE_SKEW_SECS < now {
            return Err(OidcError::InvalidToken("ID token has expired".to_string()));
        }
        if let Some(iat) = claims.iat {
            if iat - ACCEPTABLE_SKEW_SECS > now {
                return Err(OidcError::InvalidToken(
                    "ID token issued in the future".to_string(),
                ));
            }
        }

        if Url::parse(&claims.iss).is_err() {
            return Err(OidcError::InvalidToken(format!(
                "Issuer '{}' is not a valid URL",
                claims.iss
            )));
        }
        if let Some(expected) = &self.issuer {
            if claims.iss.trim_end_matches('/') != expected.trim_end_matches('/') {
                return Err(OidcError::InvalidToken(format!(
                    "Issuer mismatch: expected '{}', got '{}'",
                    expected, claims.iss
                )));
            }
        }

        if let Some((key, algorithm)) = &self.key {
            let mut validation = Validation::new(*algorithm);
            validation.set_audience(&[&self.client_id]);
            validation.leeway = ACCEPTABLE_SKEW_SECS as u64;
            jsonwebtoken::decode::<serde_json::Value>(id_token, key, &validation).map_err(|e| {
                OidcError::InvalidToken(format!("Signature check failed: {e}"))
            })?;
        }

        debug!(sub = ?claims.sub, "ID token verified");
        Ok(claims)
    }

    /// Gate a token set on its ID token.
    ///
    /// With `require_id_token` the set must carry an ID token at all.
    pub fn verify_set(
        &self,
        tokens: TokenSet,
        require_id_token: bool,
    ) -> Result<VerifiedTokenSet, OidcError> {
        let claims = match tokens.id_token.as_deref() {
            Some(id_token) => Some(self.check(id_token)?),
            None if require_id_token => {
                return Err(OidcError::InvalidToken(
                    "Token response carried no id_token".to_string(),
                ));
            }
            None => None,
        };
        Ok(VerifiedTokenSet { tokens, claims })
    }
}
