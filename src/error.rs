//! Error handling for the dockwatch monitoring engine.

/// A specialized `Result` type for dockwatch operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// The main error type for monitoring operations.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persistence layer cannot accept a read or write
    #[error("storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A sensor or device reading could not be parsed
    #[error("failed to parse reading: {0}")]
    Parse(String),

    /// A platform capability is missing or failed
    #[error("platform capability unavailable: {0}")]
    Capability(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic monitoring error
    #[error("monitor error: {0}")]
    System(String),
}

impl MonitorError {
    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new capability error
    pub fn capability_error(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new generic monitoring error
    pub fn system_error(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }
}
