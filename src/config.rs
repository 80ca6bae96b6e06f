use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "oauth.client_id") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub jmap: JmapConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// OAuth client registration and authorization server location.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    /// Issuer URL used for metadata discovery.
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub client_id: String,
    /// Only set for confidential clients.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// When both endpoints are set, discovery is skipped.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Extra query parameters appended to the authorization URL
    /// (e.g. `prompt = "consent"`).
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            client_id: String::new(),
            client_secret: None,
            redirect_uri: String::new(),
            scopes: default_scopes(),
            authorization_endpoint: None,
            token_endpoint: None,
            extra_params: BTreeMap::new(),
        }
    }
}

impl OAuthConfig {
    /// Both endpoints, when configured explicitly.
    pub fn explicit_endpoints(&self) -> Option<(&str, &str)> {
        match (
            self.authorization_endpoint.as_deref().filter(|s| !s.is_empty()),
            self.token_endpoint.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(auth), Some(token)) => Some((auth, token)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JmapConfig {
    /// URL of the JMAP session resource (usually `/.well-known/jmap`).
    #[serde(default)]
    pub session_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    /// Directory for the file backend.
    #[serde(default = "default_credential_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            dir: default_credential_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    File,
    Keyring,
    #[default]
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
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Credential store key for this identity.
    #[serde(default = "default_account")]
    pub account: String,
    /// Refresh up front when the stored access token is already expired.
    #[serde(default)]
    pub proactive_refresh: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            proactive_refresh: false,
        }
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

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "offline_access".to_string()]
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Memory
}
fn default_credential_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jmap-session")
        .join("credentials")
}
fn default_user_agent() -> String {
    crate::net::client::USER_AGENT.to_string()
}
const fn default_connect_timeout() -> u64 {
    10
}
const fn default_request_timeout() -> u64 {
    30
}
fn default_account() -> String {
    "default".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading, env overrides, validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `JMAP_SESSION_` takes precedence
    /// over the file value and is tracked in `env_overrides`.
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

    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- OAuth --
        env_opt_str!("oauth.issuer", "JMAP_SESSION_OAUTH_ISSUER", self.oauth.issuer);
        env_str!("oauth.client_id", "JMAP_SESSION_OAUTH_CLIENT_ID", self.oauth.client_id);
        env_opt_str!(
            "oauth.client_secret",
            "JMAP_SESSION_OAUTH_CLIENT_SECRET",
            self.oauth.client_secret
        );
        env_str!(
            "oauth.redirect_uri",
            "JMAP_SESSION_OAUTH_REDIRECT_URI",
            self.oauth.redirect_uri
        );
        if let Ok(val) = std::env::var("JMAP_SESSION_OAUTH_SCOPES") {
            self.oauth.scopes = val
                .split([',', ' '])
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("oauth.scopes", "JMAP_SESSION_OAUTH_SCOPES");
        }
        env_opt_str!(
            "oauth.authorization_endpoint",
            "JMAP_SESSION_OAUTH_AUTHORIZATION_ENDPOINT",
            self.oauth.authorization_endpoint
        );
        env_opt_str!(
            "oauth.token_endpoint",
            "JMAP_SESSION_OAUTH_TOKEN_ENDPOINT",
            self.oauth.token_endpoint
        );

        // -- JMAP --
        env_str!("jmap.session_url", "JMAP_SESSION_JMAP_SESSION_URL", self.jmap.session_url);

        // -- Storage --
        env_parse!("storage.backend", "JMAP_SESSION_STORAGE_BACKEND", self.storage.backend);
        env_path!("storage.dir", "JMAP_SESSION_STORAGE_DIR", self.storage.dir);

        // -- HTTP --
        env_str!("http.user_agent", "JMAP_SESSION_HTTP_USER_AGENT", self.http.user_agent);
        env_parse!(
            "http.connect_timeout_secs",
            "JMAP_SESSION_HTTP_CONNECT_TIMEOUT",
            self.http.connect_timeout_secs
        );
        env_parse!(
            "http.request_timeout_secs",
            "JMAP_SESSION_HTTP_REQUEST_TIMEOUT",
            self.http.request_timeout_secs
        );

        // -- Session --
        env_str!("session.account", "JMAP_SESSION_ACCOUNT", self.session.account);
        env_bool!(
            "session.proactive_refresh",
            "JMAP_SESSION_PROACTIVE_REFRESH",
            self.session.proactive_refresh
        );

        // -- Logging --
        env_str!("logging.level", "JMAP_SESSION_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "JMAP_SESSION_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }

    /// Check that the settings needed to build a session are present.
    pub fn validate(&self) -> Result<(), Error> {
        if self.oauth.client_id.trim().is_empty() {
            return Err(Error::Config("oauth.client_id is required".to_string()));
        }
        if self.oauth.redirect_uri.trim().is_empty() {
            return Err(Error::Config("oauth.redirect_uri is required".to_string()));
        }
        url::Url::parse(&self.oauth.redirect_uri)
            .map_err(|e| Error::Config(format!("oauth.redirect_uri is not a URL: {e}")))?;

        let has_issuer = self.oauth.issuer.as_deref().is_some_and(|s| !s.is_empty());
        if !has_issuer && self.oauth.explicit_endpoints().is_none() {
            return Err(Error::Config(
                "either oauth.issuer or both oauth.authorization_endpoint and oauth.token_endpoint are required"
                    .to_string(),
            ));
        }

        if self.jmap.session_url.trim().is_empty() {
            return Err(Error::Config("jmap.session_url is required".to_string()));
        }
        url::Url::parse(&self.jmap.session_url)
            .map_err(|e| Error::Config(format!("jmap.session_url is not a URL: {e}")))?;

        if self.session.account.is_empty() {
            return Err(Error::Config("session.account must not be empty".to_string()));
        }

        #[cfg(not(feature = "system-keyring"))]
        if self.storage.backend == StorageBackend::Keyring {
            return Err(Error::Config(
                "storage.backend = \"keyring\" requires the system-keyring feature".to_string(),
            ));
        }

        Ok(())
    }
}

// Helper for default credential storage directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
