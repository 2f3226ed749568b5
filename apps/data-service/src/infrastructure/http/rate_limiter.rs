//! Minimum-interval rate limiter.
//!
//! A `governor` token bucket with a burst of one, so callers are released at
//! most once per `min_interval`. A zero interval disables limiting.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};

type Limiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Serializes callers to at most one per `min_interval`.
pub struct RateLimiter {
    min_interval: Duration,
    limiter: Option<Limiter>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter. A zero interval never waits.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval)
            .map(|quota| GovernorRateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            min_interval,
            limiter,
        }
    }

    /// Configured interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's slot.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_ok() {
                return;
            }
            tracing::trace!(
                interval_ms = self.min_interval.as_millis(),
                "Rate limiter waiting"
            );
            limiter.until_ready().await;
        }
    }
}
