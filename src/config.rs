use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::OidcError;

/// Scope that lets the provider issue refresh tokens.
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of this app at the OpenID provider.
///
/// Loaded once at startup and shared read-only by every component.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub flow_type: FlowType,
    /// Expected `iss` claim. When unset only well-formedness is checked.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Value of the `display` authorization parameter; empty disables it.
    #[serde(default = "default_display")]
    pub display: String,
    /// Static key for ID token signature checks.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_key: Option<IdTokenKey>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            userinfo_endpoint: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            flow_type: FlowType::default(),
            issuer: None,
            display: default_display(),
            id_token_key: None,
        }
    }
}

impl ClientConfig {
    /// Check the configuration before any request is built.
    pub fn validate(&self) -> Result<(), OidcError> {
        if self.client_id.trim().is_empty() {
            return Err(OidcError::Config("client_id must not be empty".to_string()));
        }
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(OidcError::Config("at least one scope is required".to_string()));
        }
        parse_endpoint("authorization_endpoint", &self.authorization_endpoint)?;
        parse_endpoint("token_endpoint", &self.token_endpoint)?;
        parse_endpoint("redirect_uri", &self.redirect_uri)?;
        if !self.userinfo_endpoint.is_empty() {
            parse_endpoint("userinfo_endpoint", &self.userinfo_endpoint)?;
        }
        Ok(())
    }

    /// Whether the configured scopes ask for refresh tokens.
    pub fn requests_offline_access(&self) -> bool {
        self.normalized_scopes().contains(&OFFLINE_ACCESS_SCOPE)
    }

    /// Scopes with blanks and duplicates removed, in configured order.
    pub fn normalized_scopes(&self) -> Vec<&str> {
        let mut seen = Vec::with_capacity(self.scopes.len());
        for scope in &self.scopes {
            let scope = scope.trim();
            if !scope.is_empty() && !seen.contains(&scope) {
                seen.push(scope);
            }
        }
        seen
    }

    /// Space-delimited scope string as sent on the wire.
    pub fn scope_param(&self) -> String {
        self.normalized_scopes().join(" ")
    }

    /// The client secret, if one is configured and non-empty.
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.is_empty())
    }
}

fn parse_endpoint(name: &str, value: &str) -> Result<Url, OidcError> {
    if value.trim().is_empty() {
        return Err(OidcError::Config(format!("{name} must not be empty")));
    }
    Url::parse(value).map_err(|e| OidcError::Config(format!("{name} '{value}' is malformed: {e}")))
}

/// Key material for verifying ID token signatures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "algorithm", rename_all = "UPPERCASE")]
pub enum IdTokenKey {
    /// Shared secret (usually the client secret).
    Hs256 { secret: String },
    /// PEM-encoded RSA public key on disk.
    Rs256 { public_key_path: PathBuf },
}

/// Which OpenID Connect authentication flow to run.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    AuthorizationCode,
    Implicit,
    #[default]
    Hybrid,
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthorizationCode => write!(f, "authorization_code"),
            Self::Implicit => write!(f, "implicit"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for FlowType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "authorization_code" | "code" => Ok(Self::AuthorizationCode),
            "implicit" => Ok(Self::Implicit),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("Unknown flow type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    /// Account type under which accounts are registered in the store.
    #[serde(default = "default_account_type")]
    pub account_type: String,
    /// Fallback display name when the provider reports no username.
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_type: default_account_type(),
            app_name: default_app_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_redirect_uri() -> String {
    "app://oidc-account.localhost".to_string()
}
fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        OFFLINE_ACCESS_SCOPE.to_string(),
    ]
}
fn default_display() -> String {
    "touch".to_string()
}
fn default_account_type() -> String {
    "oidc-account".to_string()
}
fn default_app_name() -> String {
    "OIDC Account".to_string()
}
fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("oidc-account")
        .join("accounts")
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_request_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("oidc-account/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `OIDC_` takes precedence over the
    /// file value.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self, OidcError> {
        toml::from_str(content).map_err(|e| OidcError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! env_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                }
            };
        }
        macro_rules! env_bool {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                }
            };
        }
        macro_rules! env_parse {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    match val.parse() {
                        Ok(parsed) => $field = parsed,
                        Err(e) => tracing::warn!(var = $env, error = %e, "Ignoring invalid env override"),
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                }
            };
        }

        // -- Client --
        env_str!("OIDC_CLIENT_ID", self.client.client_id);
        env_opt_str!("OIDC_CLIENT_SECRET", self.client.client_secret);
        env_str!("OIDC_AUTHORIZATION_ENDPOINT", self.client.authorization_endpoint);
        env_str!("OIDC_TOKEN_ENDPOINT", self.client.token_endpoint);
        env_str!("OIDC_USERINFO_ENDPOINT", self.client.userinfo_endpoint);
        env_str!("OIDC_REDIRECT_URI", self.client.redirect_uri);
        env_parse!("OIDC_FLOW_TYPE", self.client.flow_type);
        env_opt_str!("OIDC_ISSUER", self.client.issuer);
        if let Ok(val) = std::env::var("OIDC_SCOPES") {
            self.client.scopes = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // -- Account --
        env_str!("OIDC_ACCOUNT_TYPE", self.account.account_type);
        env_str!("OIDC_APP_NAME", self.account.app_name);

        // -- Storage --
        env_parse!("OIDC_STORAGE_BACKEND", self.storage.backend);
        if let Ok(val) = std::env::var("OIDC_STORAGE_DIR") {
            self.storage.dir = PathBuf::from(val);
        }

        // -- HTTP --
        env_parse!("OIDC_HTTP_CONNECT_TIMEOUT", self.http.connect_timeout_secs);
        env_parse!("OIDC_HTTP_REQUEST_TIMEOUT", self.http.request_timeout_secs);

        // -- Logging --
        env_str!("OIDC_LOG_LEVEL", self.logging.level);
        env_bool!("OIDC_LOG_JSON", self.logging.json);
    }
}
