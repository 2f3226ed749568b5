//! Subscription Keys
//!
//! Domain types identifying live-stream subscriptions.
//!
//! # Design
//!
//! A key is `SYMBOL[:timeframe]`. Many listeners may share one key while the
//! service keeps a single upstream connection per key:
//! - the first listener opens the connection,
//! - the last listener leaving tears it down,
//! - N subscribes need N unsubscribes.
//!
//! The symbol is upper-cased. The timeframe is kept verbatim because exchange
//! intervals are case-significant (`1m` is a minute, `1M` a month).

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// =============================================================================
// Subscription Key
// =============================================================================

/// Identifies one upstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey {
    symbol: String,
    timeframe: Option<String>,
}

impl SubscriptionKey {
    /// Create a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty or the timeframe is present but empty.
    pub fn new(symbol: &str, timeframe: Option<&str>) -> Result<Self, SubscriptionKeyError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(SubscriptionKeyError::EmptySymbol);
        }

        let timeframe = match timeframe.map(str::trim) {
            Some("") => return Err(SubscriptionKeyError::EmptyTimeframe),
            other => other.map(str::to_string),
        };

        Ok(Self {
            symbol: symbol.to_uppercase(),
            timeframe,
        })
    }

    /// Create a symbol-only key.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty.
    pub fn symbol_only(symbol: &str) -> Result<Self, SubscriptionKeyError> {
        Self::new(symbol, None)
    }

    /// Upper-case symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Timeframe as given.
    #[must_use]
    pub fn timeframe(&self) -> Option<&str> {
        self.timeframe.as_deref()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.timeframe {
            Some(tf) => write!(f, "{}:{tf}", self.symbol),
            None => f.write_str(&self.symbol),
        }
    }
}

impl FromStr for SubscriptionKey {
    type Err = SubscriptionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((symbol, timeframe)) => Self::new(symbol, Some(timeframe)),
            None => Self::new(s, None),
        }
    }
}

/// Subscription key parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionKeyError {
    /// Symbol was empty.
    #[error("subscription key has an empty symbol")]
    EmptySymbol,
    /// Separator present but no timeframe.
    #[error("subscription key has an empty timeframe")]
    EmptyTimeframe,
}

// =============================================================================
// Listener Identity
// =============================================================================

/// Handle identifying one subscriber's listeners under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a process-unique id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Live subscription counts for one manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Keys with an open upstream.
    pub key_count: usize,
    /// Registered subscribers across all keys.
    pub listener_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
