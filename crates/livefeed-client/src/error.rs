//! Error types for the real-time client.

use livefeed_core::MessageError;
use std::time::Duration;
use thiserror::Error;

/// Failures at the connection layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No live connection to send on
    #[error("connection is not open")]
    NotOpen,

    /// The handshake failed
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The handshake did not finish in time
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Everything the client can report, to callers or to the diagnostics sink.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound frame could not be parsed; it was dropped
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] MessageError),

    /// A subscriber callback returned an error or panicked
    #[error("subscriber for '{message_type}' failed: {reason}")]
    SubscriberFailure {
        message_type: String,
        reason: String,
    },

    /// Every reconnect attempt failed
    #[error("max reconnect attempts exceeded")]
    RetryExhausted,

    /// A pending connect was abandoned by `disconnect()`
    #[error("connect cancelled by disconnect")]
    Cancelled,

    /// An outbound value could not be serialized
    #[error("failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The connection task is gone
    #[error("client has stopped")]
    Stopped,
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
