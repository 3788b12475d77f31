//! Error types for the actuation gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the actuation gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Store configuration missing or unreadable
    #[error("unknown store '{store_id}': {reason}")]
    UnknownStore { store_id: String, reason: String },

    /// Device command rejected or not delivered
    #[error("device error: {0}")]
    Device(String),

    /// Protocol-level failure inside a session
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Session id not registered
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
