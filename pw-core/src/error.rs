//! Global error types for PulseWatch.
//!
//! All error categories across the workspace are unified into a single
//! `PulseError` enum with conversions from underlying library errors.
//! Nothing inside the telemetry core is fatal; these errors surface at the
//! transport seam, during configuration and logging setup, and in the CLI.

use thiserror::Error;

/// Convenience type alias for Results using PulseError.
pub type PulseResult<T> = Result<T, PulseError>;

/// Unified error type covering all error categories in PulseWatch.
#[derive(Error, Debug)]
pub enum PulseError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Transport errors --
    /// WebSocket / Socket.IO transport error.
    #[error("socket error: {0}")]
    Socket(String),

    /// The Socket.IO handshake was refused or malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A transport operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    // -- Store errors --
    /// The state store actor has shut down.
    #[error("state store is closed")]
    StoreClosed,

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

    /// Errors from third-party libraries with no dedicated variant, such
    /// as terminal prompts.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    /// Whether this is an ordinary network fault, as opposed to a setup
    /// problem such as a bad address.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::Socket(_) | Self::Handshake(_) | Self::Timeout(_) | Self::Io(_)
        )
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(e: serde_json::Error) -> Self {
        PulseError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PulseError {
    fn from(e: toml::de::Error) -> Self {
        PulseError::Config(e.to_string())
    }
}
