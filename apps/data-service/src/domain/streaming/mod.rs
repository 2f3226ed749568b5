//! Market Data Streaming Types
//!
//! Core domain types for live market data: candles, aggregated trades,
//! mark prices and open interest. These types are codec-agnostic and
//! represent the canonical internal representation handed to listeners.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Data Kind
// =============================================================================

/// Kind of market data cached or streamed by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// OHLCV candles.
    Candles,
    /// Aggregated trades.
    AggTrades,
    /// Mark price and funding.
    MarkPrice,
    /// Open interest.
    OpenInterest,
}

impl DataKind {
    /// Get all data kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Candles,
            Self::AggTrades,
            Self::MarkPrice,
            Self::OpenInterest,
        ]
    }

    /// Stable lowercase name used in keys, logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Candles => "candles",
            Self::AggTrades => "agg_trades",
            Self::MarkPrice => "mark_price",
            Self::OpenInterest => "open_interest",
        }
    }

    /// Whether this kind is keyed by a timeframe as well as a symbol.
    #[must_use]
    pub const fn requires_timeframe(self) -> bool {
        matches!(self, Self::Candles)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle interval as understood by the exchange.
///
/// Intervals are case-significant: `1m` is one minute, `1M` is one month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute.
    #[serde(rename = "1m")]
    M1,
    /// 3 minutes.
    #[serde(rename = "3m")]
    M3,
    /// 5 minutes.
    #[serde(rename = "5m")]
    M5,
    /// 15 minutes.
    #[serde(rename = "15m")]
    M15,
    /// 30 minutes.
    #[serde(rename = "30m")]
    M30,
    /// 1 hour.
    #[serde(rename = "1h")]
    H1,
    /// 2 hours.
    #[serde(rename = "2h")]
    H2,
    /// 4 hours.
    #[serde(rename = "4h")]
    H4,
    /// 6 hours.
    #[serde(rename = "6h")]
    H6,
    /// 8 hours.
    #[serde(rename = "8h")]
    H8,
    /// 12 hours.
    #[serde(rename = "12h")]
    H12,
    /// 1 day.
    #[serde(rename = "1d")]
    D1,
    /// 3 days.
    #[serde(rename = "3d")]
    D3,
    /// 1 week.
    #[serde(rename = "1w")]
    W1,
    /// 1 month.
    #[serde(rename = "1M")]
    Mo1,
}

impl Timeframe {
    /// Exchange interval string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown interval.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown timeframe: {0}")]
pub struct UnknownTimeframe(pub String);

impl FromStr for Timeframe {
    type Err = UnknownTimeframe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tf = match s.trim() {
            "1m" => Self::M1,
            "3m" => Self::M3,
            "5m" => Self::M5,
            "15m" => Self::M15,
            "30m" => Self::M30,
            "1h" => Self::H1,
            "2h" => Self::H2,
            "4h" => Self::H4,
            "6h" => Self::H6,
            "8h" => Self::H8,
            "12h" => Self::H12,
            "1d" => Self::D1,
            "3d" => Self::D3,
            "1w" => Self::W1,
            "1M" => Self::Mo1,
            other => return Err(UnknownTimeframe(other.to_string())),
        };
        Ok(tf)
    }
}

// =============================================================================
// Streaming Payloads
// =============================================================================

/// Values retained per subscription key expose the instant they describe.
///
/// Closed-value retention uses this to detect a republished bar.
pub trait StreamItem: Clone + Send + Sync + 'static {
    /// Timestamp identifying this value (bar open time, trade time, ...).
    fn timestamp(&self) -> DateTime<Utc>;
}

/// OHLCV candle, either in progress or closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Upper-case symbol.
    pub symbol: String,
    /// Candle interval.
    pub timeframe: Timeframe,
    /// Bar open time.
    pub open_time: DateTime<Utc>,
    /// Bar close time.
    pub close_time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close (or last) price.
    pub close: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Quote asset volume.
    pub quote_volume: Decimal,
    /// Number of trades.
    pub trade_count: u64,
    /// Whether the bar is final.
    pub is_closed: bool,
}

impl StreamItem for Candle {
    fn timestamp(&self) -> DateTime<Utc> {
        self.open_time
    }
}

/// Aggregated trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggTrade {
    /// Upper-case symbol.
    pub symbol: String,
    /// Aggregate trade id.
    pub agg_id: u64,
    /// Trade price.
    pub price: Decimal,
    /// Trade quantity.
    pub quantity: Decimal,
    /// First underlying trade id.
    pub first_trade_id: u64,
    /// Last underlying trade id.
    pub last_trade_id: u64,
    /// Trade time.
    pub trade_time: DateTime<Utc>,
    /// Whether the buyer was the maker.
    pub is_buyer_maker: bool,
}

impl StreamItem for AggTrade {
    fn timestamp(&self) -> DateTime<Utc> {
        self.trade_time
    }
}

/// Mark price update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPrice {
    /// Upper-case symbol.
    pub symbol: String,
    /// Mark price.
    pub mark_price: Decimal,
    /// Index price.
    pub index_price: Decimal,
    /// Current funding rate.
    pub funding_rate: Decimal,
    /// Next funding time.
    pub next_funding_time: DateTime<Utc>,
    /// Event time.
    pub event_time: DateTime<Utc>,
}

impl StreamItem for MarkPrice {
    fn timestamp(&self) -> DateTime<Utc> {
        self.event_time
    }
}

/// Open interest sample with the change since the previous sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterestUpdate {
    /// Upper-case symbol.
    pub symbol: String,
    /// Current open interest.
    pub open_interest: Decimal,
    /// `current - previous`, zero for the first sample.
    pub delta: Decimal,
    /// Sample time.
    pub time: DateTime<Utc>,
}

impl StreamItem for OpenInterestUpdate {
    fn timestamp(&self) -> DateTime<Utc> {
        self.time
    }
}

// =============================================================================
// Stream Event
// =============================================================================

/// A decoded upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent<T> {
    /// The in-progress value changed.
    Update(T),
    /// The value finalized (candles only).
    Close(T),
}

impl<T> StreamEvent<T> {
    /// Borrow the payload.
    #[must_use]
    pub const fn payload(&self) -> &T {
        match self {
            Self::Update(v) | Self::Close(v) => v,
        }
    }

    /// Whether this is a close event.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}
