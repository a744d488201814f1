//! Crate-wide error types
//!
//! One enum covers the failure kinds the worker distinguishes; handlers map
//! them to HTTP statuses or WebSocket close codes at the edge, so most code
//! just propagates with `?`.

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all worker operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid credentials before the WebSocket upgrade
    #[error("authentication failed: {0}")]
    Auth(&'static str),

    /// Start-frame exchange failed or timed out
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Malformed or out-of-order wire record
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// AEAD seal/open or key derivation failure
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Encoder process could not be spawned or exited unexpectedly
    #[error("encoder failure: {0}")]
    Encoder(String),

    /// Capture device is already owned by another worker instance
    #[error("device unavailable: {0}")]
    Resource(String),

    /// Key file is missing required material or cannot be parsed
    #[error("key store error: {0}")]
    Keys(String),

    /// Normal cancellation during shutdown
    #[error("canceled")]
    Canceled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is expected during an orderly shutdown
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}
