//! Exponential backoff for reconnect scheduling.
//!
//! delay(n) = min(base × 2ⁿ, max), where n is the number of retries already
//! scheduled since the last successful open. Once n reaches the attempt cap,
//! no further retry is scheduled.

use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY};

/// Reconnection backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Consecutive retries allowed without a successful open.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `attempts` earlier retries.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another retry may be scheduled after `attempts` retries.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Retry bookkeeping owned by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Retries scheduled since the last successful open.
    pub attempts: u32,
    /// Deadline of the pending retry, if one is scheduled.
    pub scheduled_at: Option<Instant>,
}

impl ReconnectState {
    /// Record the next retry if the policy still allows one.
    ///
    /// The delay is computed from the attempt count *before* it is
    /// incremented, so the first retry waits `base_delay`.
    pub fn schedule(&mut self, policy: &ReconnectPolicy, now: Instant) -> Option<Duration> {
        if !policy.allows(self.attempts) {
            return None;
        }
        let delay = policy.delay_for(self.attempts);
        self.attempts += 1;
        self.scheduled_at = Some(now + delay);
        Some(delay)
    }

    /// Forget the pending retry (it fired or was cancelled).
    pub fn clear_schedule(&mut self) {
        self.scheduled_at = None;
    }

    /// Successful open: start counting from zero again.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.scheduled_at = None;
    }
}
