//! Error types for session operations.

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Token or segment structure is malformed.
    #[error("Malformed session token: {0}")]
    Decoding(String),

    /// Token could not be decrypted with the configured cipher and key.
    #[error("Session token could not be decrypted with algorithm {algorithm}")]
    Decryption { algorithm: String },

    /// An attribute value is not supported or failed to round-trip.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The cipher cannot be initialized for the configured algorithm and key.
    #[error("Security configuration error: {0}")]
    SecurityConfig(String),

    /// Attribute operation on an invalidated session.
    #[error("Session has been invalidated: {0}")]
    InvalidatedState(String),

    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadConfig {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// Config value out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A path pattern failed to compile.
    #[error("invalid path pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
