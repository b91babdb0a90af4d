//! Error taxonomy for the authenticator.
//!
//! Verification and grant errors are consumed by the lifecycle manager to
//! pick the next account state; everything else propagates to the caller
//! unchanged.

/// Errors that can occur while authorizing, exchanging, refreshing or
/// using tokens.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// Static configuration is unusable (empty client id, bad endpoint).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or I/O failure talking to the provider or an API.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An ID token failed verification. Never persisted.
    #[error("Invalid ID token: {0}")]
    InvalidToken(String),

    /// The refresh token was rejected with `invalid_grant`.
    #[error("Refresh token rejected (invalid_grant): {0}")]
    InvalidGrant(String),

    /// The user declined to authorize the app.
    #[error("Authorization denied by user")]
    AuthorizationDenied,

    /// The user dismissed the interactive authorization before it finished.
    #[error("Authorization cancelled")]
    AuthorizationCancelled,

    /// The authorization endpoint redirected back with an error.
    #[error("Authorization failed ({code}): {description}")]
    AuthorizationFailed { code: String, description: String },

    /// The redirect URI lacked the parameters required by the flow.
    #[error("Malformed redirect: {0}")]
    MalformedRedirect(String),

    /// The account needs interactive re-authorization before it can be used.
    #[error("Account '{account}' requires re-authorization")]
    ReauthorizationRequired { account: String },

    /// A guarded API call failed and cannot be recovered by refreshing.
    #[error("{status} {message}")]
    UnrecoverableApi { status: u16, message: String },

    /// Credential store failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for OidcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return OidcError::Transport(format!("request timed out: {err}"));
        }
        OidcError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for OidcError {
    fn from(err: url::ParseError) -> Self {
        OidcError::Config(format!("invalid URL: {err}"))
    }
}

impl OidcError {
    /// Text to show the user, or `None` when the outcome should not raise
    /// an error dialog.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::AuthorizationDenied | Self::AuthorizationCancelled => None,
            Self::AuthorizationFailed { code, description } => {
                Some(format!("Error code: {code}\n\n{description}"))
            }
            Self::InvalidToken(_) => Some("Could not get ID Token.".to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Whether the error means the account must go through interactive
    /// authorization again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::InvalidGrant(_) | Self::ReauthorizationRequired { .. }
        )
    }
}

pub type Result<T, E = OidcError> = std::result::Result<T, E>;
