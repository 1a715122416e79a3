//! Error types for the connection log worker
//!
//! This module defines all error types used throughout the workspace.

use thiserror::Error;

/// Result type alias for connection log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the connection log worker
#[derive(Error, Debug)]
pub enum Error {
    /// Current-state or episode store errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Time-series history errors
    #[error("History sink error: {0}")]
    History(String),

    /// Notification delivery errors
    #[error("Notifier error: {0}")]
    Notifier(String),

    /// Device registry synchronisation errors
    #[error("Registry sync error: {0}")]
    Registry(String),

    /// Message stream transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed event payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client errors (from outbound adapters)
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a history sink error
    pub fn history(msg: impl Into<String>) -> Self {
        Self::History(msg.into())
    }

    /// Create a notifier error
    pub fn notifier(msg: impl Into<String>) -> Self {
        Self::Notifier(msg.into())
    }

    /// Create a registry sync error
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Whether this error came from a malformed payload rather than a collaborator
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
