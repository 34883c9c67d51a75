//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry; doubles on every further attempt
    pub base_delay_ms: u64,

    /// Retries allowed after an unexpected closure before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Configuration for a [`crate::RealtimeClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,

    /// Upper bound on a single open handshake
    pub connect_timeout_ms: u64,

    /// Status snapshots buffered per slow status observer
    pub status_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout_ms: 10_000,
            status_buffer: 64,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Override the reconnection parameters.
    pub fn with_reconnect(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.reconnect = ReconnectConfig {
            base_delay_ms: u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX),
            max_attempts,
        };
        self
    }
}
