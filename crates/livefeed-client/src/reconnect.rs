//! Bounded exponential backoff.
//!
//! The policy is a pure function of the attempt counter: attempt `n` waits
//! `base * 2^(n-1)`, and retries stop once the counter reaches the limit.
//! There is no jitter.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryState {
    /// Retries scheduled since the last successful open
    pub attempt: u32,
    /// Delay of the most recently scheduled retry
    pub next_delay: Duration,
}

/// Decides whether and when to reconnect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    state: RetryState,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            state: RetryState::default(),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_attempts)
    }

    /// True while `attempt` is below the limit.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Record an unexpected closure or failed retry.
    ///
    /// Returns the delay before the next attempt, or `None` once the limit is
    /// reached. The counter is left untouched when retries are exhausted.
    pub fn next_retry(&mut self) -> Option<Duration> {
        if !self.should_retry(self.state.attempt) {
            return None;
        }
        self.state.attempt += 1;
        self.state.next_delay = self.delay_for(self.state.attempt);
        Some(self.state.next_delay)
    }

    /// Zero the counter after a successful open.
    pub fn reset(&mut self) {
        self.state = RetryState::default();
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
