//! Resilient REST Access
//!
//! Shared client for rate-limited third-party APIs: a minimum-interval rate
//! limiter, a consecutive-failure circuit breaker, bounded exponential
//! retry and page-by-page fetching.

mod circuit_breaker;
mod client;
mod error;
mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use client::{ApiClientConfig, ResilientApiClient, RetryConfig};
pub use error::ApiError;
pub use rate_limiter::RateLimiter;
