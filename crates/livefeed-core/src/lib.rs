//! Core types for livefeed.
//!
//! This crate provides the primitives shared by the real-time client and its
//! collaborators: where to connect, what arrives, and how the connection is
//! doing. It performs no I/O.

mod close;
mod endpoint;
mod message;

pub use close::{CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL, CloseReason};
pub use endpoint::{Endpoint, EndpointParseError};
pub use message::{InboundMessage, MessageError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Frames are flowing.
    Open,
    /// Local close in progress.
    Closing,
    /// Stopped; only an explicit connect starts again.
    Closed,
    /// Lost the connection, waiting for the next retry.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Observable connection snapshot, published to the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub last_connected_at: Option<SystemTime>,
    pub last_error: Option<String>,
}
