//! Why a connection ended.

use std::fmt;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// A close frame arrived without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// The connection dropped without a closing handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Classification of a finished connection, decided once by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The local side asked for the close.
    ClientRequested,
    /// The peer sent a close frame.
    ServerClosed { code: u16, reason: String },
    /// The connection broke without a closing handshake.
    NetworkError(String),
}

impl CloseReason {
    /// The websocket close code.
    pub fn code(&self) -> u16 {
        match self {
            Self::ClientRequested => CLOSE_NORMAL,
            Self::ServerClosed { code, .. } => *code,
            Self::NetworkError(_) => CLOSE_ABNORMAL,
        }
    }

    /// Whether a closing handshake took place.
    pub fn is_clean(&self) -> bool {
        !matches!(self, Self::NetworkError(_))
    }

    /// Whether the close was not caused by the local side.
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::ClientRequested)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientRequested => write!(f, "closed by client"),
            Self::ServerClosed { code, reason } if reason.is_empty() => {
                write!(f, "closed by server ({code})")
            }
            Self::ServerClosed { code, reason } => write!(f, "closed by server ({code}): {reason}"),
            Self::NetworkError(detail) => write!(f, "connection lost: {detail}"),
        }
    }
}
