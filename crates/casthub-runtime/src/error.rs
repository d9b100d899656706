//! Runtime error types following panic-free policy.

use thiserror::Error;

/// Errors raised by the hub session and the extension runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Failed to reach the hub at all
    #[error("failed to connect to hub at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Underlying socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet could not be serialized or parsed
    #[error("protocol error: {0}")]
    Protocol(#[from] casthub_protocol::ProtocolError),

    /// A packet could not be serialized to JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session's writer task has gone away
    #[error("session closed")]
    SessionClosed,

    /// An HTTP poll against a third-party API failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A required configuration setting is missing or invalid
    #[error("config error: {0}")]
    Config(#[from] casthub_core::ConfigError),

    /// An extension callback reported a failure
    #[error("extension error: {0}")]
    Extension(String),

    /// The runtime was asked to shut down
    #[error("cancelled")]
    Cancelled,
}

impl RuntimeError {
    /// Shorthand for an extension-reported failure.
    pub fn extension(msg: impl Into<String>) -> Self {
        Self::Extension(msg.into())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
