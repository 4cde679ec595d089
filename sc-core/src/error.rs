//! Global error types for the stream client.
//!
//! Configuration, encoding and I/O failures are unified into a single
//! `ScError` enum with conversions from underlying library errors.
//! Connection-level failures never surface here; they are absorbed into the
//! socket connection state instead.

use thiserror::Error;

/// Convenience type alias for Results using ScError.
pub type ScResult<T> = Result<T, ScError>;

/// Unified error type for the stream client.
#[derive(Error, Debug)]
pub enum ScError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// An endpoint could not be turned into a transport request.
    #[error("request encoding failed: {0}")]
    RequestEncoding(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for ScError {
    fn from(e: serde_json::Error) -> Self {
        ScError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ScError {
    fn from(e: toml::de::Error) -> Self {
        ScError::Config(e.to_string())
    }
}
