//! Exponential reconnect backoff.

use std::time::Duration;

/// Counts consecutive reconnect attempts and hands out doubling delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReconnectBackoff {
    attempts: u32,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    next_delay: Duration,
}

impl ReconnectBackoff {
    pub(crate) const fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            initial_delay,
            max_delay,
            next_delay: initial_delay,
        }
    }

    /// Records an attempt; returns its number and delay, or `None` once the
    /// budget is spent.
    pub(crate) fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.max_attempts {
            return None;
        }

        let delay = self.next_delay;
        self.next_delay = delay.saturating_mul(2).min(self.max_delay);
        Some((self.attempts, delay))
    }

    pub(crate) const fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay = self.initial_delay;
    }

    /// Attempts recorded since the last reset, capped at the maximum.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.min(self.max_attempts)
    }

    pub(crate) const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
