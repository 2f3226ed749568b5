//! Reconnection Policy
//!
//! Live streams wait a fixed delay between upstream reconnection attempts
//! and keep retrying for as long as the key has subscribers.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before every reconnection attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl ReconnectConfig {
    /// Constant delay between attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }
}

/// Attempt counter for one connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no attempts recorded.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Record an attempt and return the delay to wait before it.
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.config.delay
    }

    /// Clear the attempt count after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_waits_five_seconds() {
        assert_eq!(ReconnectConfig::default().delay, Duration::from_secs(5));
    }

    #[test]
    fn delay_never_grows() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_secs(5)));
        for _ in 0..10 {
            assert_eq!(policy.next_delay(), Duration::from_secs(5));
        }
        assert_eq!(policy.attempt_count(), 10);
    }

    #[test]
    fn reset_clears_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_millis(10)));
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(10));
    }
}
