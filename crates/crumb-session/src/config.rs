//! Configuration for the session store.

use std::path::Path;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Default absolute session lifetime in minutes.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 30;

/// Default inactivity timeout (disabled).
pub const DEFAULT_INACTIVITY_TIMEOUT_SECONDS: i64 = -1;

/// Default cache capacity (caching disabled).
pub const DEFAULT_MAX_IN_MEMORY_SESSIONS: i64 = -1;

/// Default minimum gap between cache purges.
pub const DEFAULT_MIN_SECONDS_BETWEEN_PURGES: u64 = 15;

/// Default encryption algorithm; the key length picks AES-128 or AES-256.
pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "AES";

/// Default cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "app.session";

/// Most browsers stop accepting cookies around 4 KB.
pub const DEFAULT_COOKIE_SIZE_WARNING_BYTES: usize = 4 * 1024;

/// Environment variable consulted before `encryption_key`.
pub const ENCRYPTION_KEY_ENV: &str = "CRUMB_SESSION_KEY";

/// Configuration for the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum session age in minutes, measured from creation. Negative
    /// means sessions never reach an age limit.
    pub session_timeout_minutes: i64,

    /// Maximum gap between requests in seconds. Negative disables it.
    pub inactivity_timeout_seconds: i64,

    /// Cache capacity. Zero or negative disables the in-memory cache.
    pub max_in_memory_sessions: i64,

    /// Purge the cache from a background thread instead of request threads.
    pub purge_with_background_thread: bool,

    /// Minimum number of seconds between cache purges.
    pub min_seconds_between_purges: u64,

    /// Token encryption algorithm (`AES`, `AES-128-GCM`, `AES-256-GCM`,
    /// `CHACHA20-POLY1305`).
    pub encryption_algorithm: String,

    /// Base64 encryption key. Prefer the `CRUMB_SESSION_KEY` environment
    /// variable over storing the key in a config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    /// Domain attribute for the session cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_domain: Option<String>,

    /// Name of the session cookie.
    pub cookie_name: String,

    /// Token size at which a warning is reported.
    pub cookie_size_warning_bytes: usize,

    /// If non-empty, only request paths fully matching one of these regexes
    /// get a session.
    pub only_paths: Vec<String>,

    /// Request paths fully matching any of these regexes never get a session.
    pub except_paths: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            inactivity_timeout_seconds: DEFAULT_INACTIVITY_TIMEOUT_SECONDS,
            max_in_memory_sessions: DEFAULT_MAX_IN_MEMORY_SESSIONS,
            purge_with_background_thread: false,
            min_seconds_between_purges: DEFAULT_MIN_SECONDS_BETWEEN_PURGES,
            encryption_algorithm: DEFAULT_ENCRYPTION_ALGORITHM.to_string(),
            encryption_key: None,
            cookie_domain: None,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_size_warning_bytes: DEFAULT_COOKIE_SIZE_WARNING_BYTES,
            only_paths: Vec::new(),
            except_paths: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SessionError::ReadConfig {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SessionError::InvalidConfig(e.to_string()))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.min_seconds_between_purges == 0 {
            return Err(SessionError::InvalidConfig(
                "min_seconds_between_purges must be at least 1".to_string(),
            ));
        }
        if self.cookie_name.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "cookie_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the in-memory cache is enabled.
    pub fn caching_enabled(&self) -> bool {
        self.max_in_memory_sessions > 0
    }

    /// Whether inactivity expiry (and per-request token refresh) is enabled.
    pub fn inactivity_enabled(&self) -> bool {
        self.inactivity_timeout_seconds >= 0
    }

    /// Minimum gap between purges as a `Duration`.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.min_seconds_between_purges)
    }

    /// Resolve the raw encryption key.
    ///
    /// Checks in order:
    /// 1. `CRUMB_SESSION_KEY` environment variable
    /// 2. `encryption_key` config value
    pub fn resolve_encryption_key(&self) -> Result<Vec<u8>> {
        let env_value = std::env::var(ENCRYPTION_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty());

        let (encoded, source) = match (env_value, self.encryption_key.as_deref()) {
            (Some(value), _) => (value, ENCRYPTION_KEY_ENV),
            (None, Some(value)) => (value.to_string(), "encryption_key"),
            (None, None) => {
                return Err(SessionError::SecurityConfig(format!(
                    "no encryption key configured (set {} or encryption_key)",
                    ENCRYPTION_KEY_ENV
                )));
            }
        };

        STANDARD.decode(encoded.trim()).map_err(|e| {
            SessionError::SecurityConfig(format!("{} is not valid base64: {}", source, e))
        })
    }

    /// Set the absolute session lifetime.
    pub fn with_session_timeout_minutes(mut self, minutes: i64) -> Self {
        self.session_timeout_minutes = minutes;
        self
    }

    /// Set the inactivity timeout. Negative disables it.
    pub fn with_inactivity_timeout_seconds(mut self, seconds: i64) -> Self {
        self.inactivity_timeout_seconds = seconds;
        self
    }

    /// Set the cache capacity. Zero or negative disables caching.
    pub fn with_max_in_memory_sessions(mut self, max: i64) -> Self {
        self.max_in_memory_sessions = max;
        self
    }

    /// Purge from a background thread instead of request threads.
    pub fn with_background_purge(mut self, enabled: bool) -> Self {
        self.purge_with_background_thread = enabled;
        self
    }

    /// Set the minimum gap between purges.
    pub fn with_min_seconds_between_purges(mut self, seconds: u64) -> Self {
        self.min_seconds_between_purges = seconds;
        self
    }

    /// Set the encryption algorithm name.
    pub fn with_encryption_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.encryption_algorithm = algorithm.into();
        self
    }

    /// Set the encryption key from raw bytes.
    pub fn with_encryption_key(mut self, key: &[u8]) -> Self {
        self.encryption_key = Some(STANDARD.encode(key));
        self
    }

    /// Set the cookie domain.
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    /// Set the cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set the token size warning threshold.
    pub fn with_cookie_size_warning_bytes(mut self, bytes: usize) -> Self {
        self.cookie_size_warning_bytes = bytes;
        self
    }

    /// Restrict sessions to paths matching these patterns.
    pub fn with_only_paths(mut self, patterns: Vec<String>) -> Self {
        self.only_paths = patterns;
        self
    }

    /// Exclude paths matching these patterns.
    pub fn with_except_paths(mut self, patterns: Vec<String>) -> Self {
        self.except_paths = patterns;
        self
    }
}
