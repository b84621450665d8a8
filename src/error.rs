//! Error types shared by the hub and client sides of the bus

use thiserror::Error;

/// Errors that can occur anywhere on the bus
#[derive(Error, Debug)]
pub enum BusError {
    /// The hub was constructed after the host signalled readiness
    #[error("setup order violated: the hub must be created before the host is ready")]
    SetupOrder,

    /// A line of an inbound frame stream was not a valid envelope
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// No handler is registered for the invoked channel
    #[error("no handler registered for channel '{0}'")]
    HandlerNotFound(String),

    /// The handler ran and failed
    #[error("handler failed: {0}")]
    Invocation(String),

    /// The underlying request/stream primitive failed or refused the request
    #[error("transport error: {0}")]
    Transport(String),

    /// Failed to serialize/deserialize a payload
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// True for failures a reconnecting consumer should back off from
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Transport(_) | BusError::MalformedFrame(_))
    }
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
