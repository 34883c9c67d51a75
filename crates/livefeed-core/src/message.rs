//! Inbound event frames.
//!
//! Every frame the backend pushes is a JSON object with a `type` tag, a
//! `timestamp` and an application-defined `payload`. Anything else on the
//! object is kept as-is and handed to subscribers untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// One parsed event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    /// As sent by the backend (epoch millis or an RFC 3339 string).
    #[serde(default = "receipt_timestamp")]
    timestamp: Value,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl InboundMessage {
    /// Create a message with no extra fields.
    pub fn new(kind: impl Into<String>, payload: Value, timestamp: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp,
            extra: Map::new(),
        }
    }

    /// Parse a raw frame.
    pub fn from_slice(raw: &[u8]) -> Result<Self, MessageError> {
        let message: Self = serde_json::from_slice(raw)?;
        if message.kind.is_empty() {
            return Err(MessageError::EmptyType);
        }
        Ok(message)
    }

    /// The message type subscribers register under.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> &Value {
        &self.timestamp
    }

    /// Fields beyond `type`, `payload` and `timestamp`.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

fn receipt_timestamp() -> Value {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    Value::from(millis)
}

/// Error parsing an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame type cannot be empty")]
    EmptyType,
}
