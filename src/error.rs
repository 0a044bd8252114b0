//! Error types for the bridge

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types
///
/// Most runtime failures on the command and video channels degrade to
/// `None`/`false` results at the component boundary; this enum covers the
/// construction and startup paths where an error is worth surfacing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Communication timeout
    #[error("Communication timeout")]
    Timeout,

    /// Startup failed (e.g. a required port could not be bound)
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Command link is not connected
    #[error("Not connected")]
    NotConnected,

    /// Video decode backend error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Requested decode backend is not built in or not available
    #[error("Decoder not available: {0}")]
    DecoderUnavailable(&'static str),

    /// Invalid configuration value
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
