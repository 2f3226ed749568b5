//! Preload Requests
//!
//! Immutable work items describing a range of market data to fetch ahead of
//! use. The service does not decide what to preload; it provides ordering and
//! deduplication so an external scheduler can keep a well-behaved queue:
//!
//! - strict FIFO within a priority tier,
//! - at most one live entry per dedupe key,
//! - four tiers, with `Urgent` reserved for foreground loads.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::coverage::TimeRange;
use crate::domain::streaming::{DataKind, Timeframe};

// =============================================================================
// Priority
// =============================================================================

/// Scheduling tier. Lower variants are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadPriority {
    /// Foreground load a user is waiting on.
    Urgent,
    /// Likely next view.
    High,
    /// Background warm-up.
    Normal,
    /// Opportunistic fill.
    Low,
}

impl PreloadPriority {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for PreloadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Preload Request
// =============================================================================

/// A request to load `range` of `kind` data for `symbol`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadRequest {
    kind: DataKind,
    symbol: String,
    timeframe: Option<Timeframe>,
    range: TimeRange,
    priority: PreloadPriority,
    queued_at: DateTime<Utc>,
}

impl PreloadRequest {
    /// Create a request queued now.
    #[must_use]
    pub fn new(
        kind: DataKind,
        symbol: &str,
        timeframe: Option<Timeframe>,
        range: TimeRange,
        priority: PreloadPriority,
    ) -> Self {
        Self::with_queued_at(kind, symbol, timeframe, range, priority, Utc::now())
    }

    /// Create a request with an explicit queue time.
    #[must_use]
    pub fn with_queued_at(
        kind: DataKind,
        symbol: &str,
        timeframe: Option<Timeframe>,
        range: TimeRange,
        priority: PreloadPriority,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            symbol: symbol.trim().to_uppercase(),
            timeframe,
            range,
            priority,
            queued_at,
        }
    }

    /// Data kind.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        self.kind
    }

    /// Upper-case symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Candle interval, if any.
    #[must_use]
    pub const fn timeframe(&self) -> Option<Timeframe> {
        self.timeframe
    }

    /// Requested range.
    #[must_use]
    pub const fn range(&self) -> TimeRange {
        self.range
    }

    /// Scheduling tier.
    #[must_use]
    pub const fn priority(&self) -> PreloadPriority {
        self.priority
    }

    /// When the request entered the queue.
    #[must_use]
    pub const fn queued_at(&self) -> DateTime<Utc> {
        self.queued_at
    }

    /// Whether this is a foreground load.
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.priority == PreloadPriority::Urgent
    }

    /// Identity used to collapse duplicate requests.
    ///
    /// Format: `kind:SYMBOL:timeframe:startMs-endMs`, timeframe empty when absent.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        let timeframe = self.timeframe.map_or("", Timeframe::as_str);
        format!(
            "{}:{}:{}:{}-{}",
            self.kind,
            self.symbol,
            timeframe,
            self.range.start().timestamp_millis(),
            self.range.end().timestamp_millis()
        )
    }

    /// Scheduling order: most urgent first, then oldest first.
    #[must_use]
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.queued_at.cmp(&other.queued_at))
    }
}

// =============================================================================
// Heap Adapter
// =============================================================================

/// Wraps a request for `BinaryHeap`, which pops the greatest element.
///
/// The sequence number breaks ties between requests queued at the same
/// instant so the tier stays strictly FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPreload {
    request: PreloadRequest,
    sequence: u64,
}

impl QueuedPreload {
    /// Wrap `request` with its insertion sequence number.
    #[must_use]
    pub const fn new(request: PreloadRequest, sequence: u64) -> Self {
        Self { request, sequence }
    }

    /// Borrow the request.
    #[must_use]
    pub const fn request(&self) -> &PreloadRequest {
        &self.request
    }

    /// Unwrap the request.
    #[must_use]
    pub fn into_request(self) -> PreloadRequest {
        self.request
    }
}

impl Ord for QueuedPreload {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .request
            .schedule_cmp(&self.request)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedPreload {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
