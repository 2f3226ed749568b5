//! Coverage Tracking
//!
//! Tracks which time ranges of market data are already cached per
//! (symbol, data kind, timeframe). Answers two questions for the loader:
//! "is this range cached?" and "which sub-ranges are missing?".
//!
//! # Invariants
//!
//! - Stored ranges are sorted by start.
//! - Stored ranges are pairwise non-overlapping and non-adjacent: touching
//!   ranges merge on insert, so `ranges[i].end < ranges[i + 1].start`.
//! - The union of stored ranges equals the union of every inserted range.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{DataKind, Timeframe};

// =============================================================================
// Time Range
// =============================================================================

/// Closed time interval `[start, end]` with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range, rejecting `start > end`.
    ///
    /// # Errors
    ///
    /// Returns `TimeRangeError::Inverted` if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeRangeError> {
        if start > end {
            return Err(TimeRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Create a range from epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if either instant is out of range or `start > end`.
    pub fn from_millis(start_ms: i64, end_ms: i64) -> Result<Self, TimeRangeError> {
        let start = DateTime::from_timestamp_millis(start_ms)
            .ok_or(TimeRangeError::OutOfRange(start_ms))?;
        let end =
            DateTime::from_timestamp_millis(end_ms).ok_or(TimeRangeError::OutOfRange(end_ms))?;
        Self::new(start, end)
    }

    /// Range start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Range end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether `start == end`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the ranges overlap or touch end-to-start.
    #[must_use]
    pub fn touches(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Whether `other` lies entirely inside this range.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether `t` lies inside this range (inclusive).
    #[must_use]
    pub fn contains_time(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    fn span(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

/// Time range construction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeRangeError {
    /// Start is after end.
    #[error("time range start {start} is after end {end}")]
    Inverted {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },
    /// Epoch milliseconds outside the representable range.
    #[error("timestamp {0}ms is out of range")]
    OutOfRange(i64),
}

// =============================================================================
// Coverage Tracker
// =============================================================================

/// Ordered set of cached ranges for one coverage key.
#[derive(Debug, Clone, Default)]
pub struct CoverageTracker {
    ranges: Vec<TimeRange>,
}

impl CoverageTracker {
    /// Create an empty tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Record `range` as cached, merging every stored range it overlaps or touches.
    pub fn add(&mut self, range: TimeRange) {
        let mut seed = range;
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);

        for existing in self.ranges.drain(..) {
            if existing.touches(&seed) {
                seed = seed.span(&existing);
            } else {
                kept.push(existing);
            }
        }

        kept.push(seed);
        kept.sort_by_key(TimeRange::start);
        self.ranges = kept;
    }

    /// Whether a single stored range fully contains `range`.
    #[must_use]
    pub fn contains(&self, range: &TimeRange) -> bool {
        self.ranges.iter().any(|r| r.covers(range))
    }

    /// Whether `t` falls inside any stored range.
    #[must_use]
    pub fn contains_time(&self, t: DateTime<Utc>) -> bool {
        self.ranges.iter().any(|r| r.contains_time(t))
    }

    /// Sub-ranges of `range` not covered by any stored range, in order.
    ///
    /// A zero-length query yields no gaps.
    #[must_use]
    pub fn find_gaps(&self, range: &TimeRange) -> Vec<TimeRange> {
        if range.is_empty() {
            return Vec::new();
        }

        let mut gaps = Vec::new();
        let mut cursor = range.start;

        for stored in &self.ranges {
            if stored.end <= cursor {
                continue;
            }
            if stored.start >= range.end {
                break;
            }
            if stored.start > cursor {
                gaps.push(TimeRange {
                    start: cursor,
                    end: stored.start,
                });
            }
            cursor = cursor.max(stored.end);
            if cursor >= range.end {
                break;
            }
        }

        if cursor < range.end {
            gaps.push(TimeRange {
                start: cursor,
                end: range.end,
            });
        }

        gaps
    }

    /// Snapshot of the stored ranges, sorted by start.
    #[must_use]
    pub fn ranges(&self) -> Vec<TimeRange> {
        self.ranges.clone()
    }

    /// Number of disjoint stored ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Drop every stored range.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

// =============================================================================
// Coverage Registry
// =============================================================================

/// Identifies one coverage set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoverageKey {
    /// Upper-case symbol.
    pub symbol: String,
    /// Data kind.
    pub kind: DataKind,
    /// Candle interval, when the kind has one.
    pub timeframe: Option<Timeframe>,
}

impl CoverageKey {
    /// Create a key; the symbol is upper-cased.
    #[must_use]
    pub fn new(symbol: &str, kind: DataKind, timeframe: Option<Timeframe>) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            kind,
            timeframe,
        }
    }
}

impl fmt::Display for CoverageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timeframe {
            Some(tf) => write!(f, "{}:{}:{}", self.kind, self.symbol, tf),
            None => write!(f, "{}:{}", self.kind, self.symbol),
        }
    }
}

/// One tracker per coverage key.
///
/// Each tracker sits behind its own mutex and every operation holds it for
/// its full duration, so concurrent adds to one key converge to the merged
/// state while different keys never contend.
#[derive(Debug, Default)]
pub struct CoverageRegistry {
    trackers: RwLock<HashMap<CoverageKey, Arc<Mutex<CoverageTracker>>>>,
}

impl CoverageRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tracker(&self, key: &CoverageKey) -> Option<Arc<Mutex<CoverageTracker>>> {
        self.trackers.read().get(key).cloned()
    }

    fn tracker_or_insert(&self, key: &CoverageKey) -> Arc<Mutex<CoverageTracker>> {
        if let Some(tracker) = self.tracker(key) {
            return tracker;
        }
        Arc::clone(self.trackers.write().entry(key.clone()).or_default())
    }

    /// Record `range` as cached for `key`.
    pub fn add(&self, key: &CoverageKey, range: TimeRange) {
        let tracker = self.tracker_or_insert(key);
        let mut guard = tracker.lock();
        guard.add(range);
        tracing::trace!(key = %key, range = %range, ranges = guard.len(), "Coverage updated");
    }

    /// Whether `range` is fully cached for `key`.
    #[must_use]
    pub fn contains(&self, key: &CoverageKey, range: &TimeRange) -> bool {
        self.tracker(key).is_some_and(|t| t.lock().contains(range))
    }

    /// Whether `t` is cached for `key`.
    #[must_use]
    pub fn contains_time(&self, key: &CoverageKey, t: DateTime<Utc>) -> bool {
        self.tracker(key)
            .is_some_and(|tracker| tracker.lock().contains_time(t))
    }

    /// Missing sub-ranges of `range` for `key`.
    #[must_use]
    pub fn find_gaps(&self, key: &CoverageKey, range: &TimeRange) -> Vec<TimeRange> {
        match self.tracker(key) {
            Some(tracker) => tracker.lock().find_gaps(range),
            None if range.is_empty() => Vec::new(),
            None => vec![*range],
        }
    }

    /// Snapshot of cached ranges for `key`.
    #[must_use]
    pub fn ranges(&self, key: &CoverageKey) -> Vec<TimeRange> {
        self.tracker(key).map(|t| t.lock().ranges()).unwrap_or_default()
    }

    /// Forget everything cached for `key`.
    pub fn clear(&self, key: &CoverageKey) {
        if self.trackers.write().remove(key).is_some() {
            tracing::debug!(key = %key, "Coverage cleared");
        }
    }

    /// Forget every key.
    pub fn clear_all(&self) {
        self.trackers.write().clear();
    }

    /// Keys with recorded coverage.
    #[must_use]
    pub fn keys(&self) -> Vec<CoverageKey> {
        let mut keys: Vec<_> = self.trackers.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
