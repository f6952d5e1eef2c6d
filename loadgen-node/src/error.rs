use thiserror::Error;

/// Errors that can occur in the load generation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or inconsistent simulation configuration, rejected before a run starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Individual request failure: network error, non-2xx status, or timeout
    #[error("Transport error: {0}")]
    Transport(String),

    /// Dispatch demand exceeded available worker slots
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Operation on an unknown or already-terminal run
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Broadcast to a saturated or broken observer
    #[error("Observer delivery error: {0}")]
    ObserverDelivery(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
