//! Error types for meownet.

use thiserror::Error;

/// Main error type for all meownet operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// Transport failure (connect/read/write). Always terminal for the
    /// affected connection.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Framing violation: short body read, unknown tag, or a declared body
    /// size beyond the configured maximum. Closes the connection.
    #[error("framing error: {0}")]
    Framing(String),

    /// Send attempted on a connection that is no longer open.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation requires a connection but none was established.
    #[error("not connected")]
    NotConnected,

    /// JSON (de)serialization error for structured payloads.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using NetError.
pub type Result<T> = std::result::Result<T, NetError>;
