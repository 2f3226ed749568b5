//! Consecutive-failure circuit breaker.
//!
//! # State Machine
//!
//! ```text
//! CLOSED ──(failure_threshold consecutive failures)──► OPEN
//! OPEN ──(cooldown elapsed, checked on next call)──► CLOSED
//! OPEN ──(reset)──► CLOSED
//! ```
//!
//! Any success resets the failure count.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::infrastructure::metrics;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            cooldown: Duration::from_secs(15 * 60),
        }
    }
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerState {
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Whether calls are currently rejected.
    pub is_open: bool,
    /// When the circuit opened.
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct Opened {
    at: Instant,
    wall: DateTime<Utc>,
}

/// Circuit breaker for one upstream.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    opened: Mutex<Option<Opened>>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            consecutive_failures: AtomicU32::new(0),
            opened: Mutex::new(None),
        }
    }

    /// Get the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed. Closes an open circuit whose cooldown elapsed.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let mut opened = self.opened.lock();
        match *opened {
            None => true,
            Some(o) if o.at.elapsed() >= self.config.cooldown => {
                *opened = None;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                tracing::info!(client = %self.name, "Circuit cooldown elapsed, closing");
                true
            }
            Some(_) => false,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a failed call, opening the circuit at the threshold.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.config.failure_threshold {
            return;
        }

        let mut opened = self.opened.lock();
        if opened.is_none() {
            *opened = Some(Opened {
                at: Instant::now(),
                wall: Utc::now(),
            });
            metrics::record_circuit_open(&self.name);
            tracing::warn!(
                client = %self.name,
                failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit opened"
            );
        }
    }

    /// Close the circuit and clear the failure count.
    pub fn reset(&self) {
        *self.opened.lock() = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        tracing::info!(client = %self.name, "Circuit reset");
    }

    /// Whether the circuit is open (without applying the cooldown).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened
            .lock()
            .is_some_and(|o| o.at.elapsed() < self.config.cooldown)
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Status snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        let opened = *self.opened.lock();
        CircuitBreakerState {
            consecutive_failures: self.consecutive_failures(),
            is_open: opened.is_some_and(|o| o.at.elapsed() < self.config.cooldown),
            opened_at: opened.map(|o| o.wall),
        }
    }
}
