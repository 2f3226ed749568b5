//! Binance USDⓈ-M Futures Message Types
//!
//! Wire format types for the public market streams and the open interest
//! REST endpoint. Prices and quantities arrive as JSON strings; timestamps
//! are epoch milliseconds.
//!
//! # References
//!
//! - [Kline streams](https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Kline-Candlestick-Streams)
//! - [Aggregate trade streams](https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Aggregate-Trade-Streams)
//! - [Mark price stream](https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Mark-Price-Stream)
//! - [Open interest](https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Open-Interest)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

// =============================================================================
// Kline
// =============================================================================

/// Kline stream event.
///
/// # Wire Format (JSON)
/// ```json
/// {"e":"kline","E":1638747660000,"s":"BTCUSDT","k":{"t":1638747660000,
///  "T":1638747719999,"s":"BTCUSDT","i":"1m","o":"0.0010","c":"0.0020",
///  "h":"0.0025","l":"0.0015","v":"1000","n":100,"x":false,"q":"1.0000"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KlineEvent {
    /// Event type (always "kline").
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Bar payload.
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

/// Bar payload inside a [`KlineEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KlinePayload {
    /// Bar open time.
    #[serde(rename = "t", with = "chrono::serde::ts_milliseconds")]
    pub open_time: DateTime<Utc>,

    /// Bar close time.
    #[serde(rename = "T", with = "chrono::serde::ts_milliseconds")]
    pub close_time: DateTime<Utc>,

    /// Interval, e.g. "1m".
    #[serde(rename = "i")]
    pub interval: String,

    /// Open price.
    #[serde(rename = "o")]
    pub open: Decimal,

    /// Close price.
    #[serde(rename = "c")]
    pub close: Decimal,

    /// High price.
    #[serde(rename = "h")]
    pub high: Decimal,

    /// Low price.
    #[serde(rename = "l")]
    pub low: Decimal,

    /// Base asset volume.
    #[serde(rename = "v")]
    pub volume: Decimal,

    /// Number of trades.
    #[serde(rename = "n")]
    pub trade_count: u64,

    /// Whether this bar is closed.
    #[serde(rename = "x")]
    pub is_closed: bool,

    /// Quote asset volume.
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
}

// =============================================================================
// Aggregate Trade
// =============================================================================

/// Aggregate trade stream event.
///
/// # Wire Format (JSON)
/// ```json
/// {"e":"aggTrade","E":123456789,"s":"BTCUSDT","a":5933014,"p":"0.001",
///  "q":"100","f":100,"l":105,"T":123456785,"m":true}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggTradeEvent {
    /// Event type (always "aggTrade").
    #[serde(rename = "e")]
    pub event_type: String,

    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade id.
    #[serde(rename = "a")]
    pub agg_id: u64,

    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,

    /// First trade id.
    #[serde(rename = "f")]
    pub first_trade_id: u64,

    /// Last trade id.
    #[serde(rename = "l")]
    pub last_trade_id: u64,

    /// Trade time.
    #[serde(rename = "T", with = "chrono::serde::ts_milliseconds")]
    pub trade_time: DateTime<Utc>,

    /// Whether the buyer is the market maker.
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

// =============================================================================
// Mark Price
// =============================================================================

/// Mark price stream event.
///
/// # Wire Format (JSON)
/// ```json
/// {"e":"markPriceUpdate","E":1562305380000,"s":"BTCUSDT","p":"11794.15",
///  "i":"11784.62","P":"11784.25","r":"0.00038167","T":1562306400000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarkPriceEvent {
    /// Event type (always "markPriceUpdate").
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Mark price.
    #[serde(rename = "p")]
    pub mark_price: Decimal,

    /// Index price.
    #[serde(rename = "i")]
    pub index_price: Decimal,

    /// Funding rate.
    #[serde(rename = "r")]
    pub funding_rate: Decimal,

    /// Next funding time.
    #[serde(rename = "T", with = "chrono::serde::ts_milliseconds")]
    pub next_funding_time: DateTime<Utc>,
}

// =============================================================================
// Open Interest (REST)
// =============================================================================

/// `GET /fapi/v1/openInterest` response.
///
/// # Wire Format (JSON)
/// ```json
/// {"openInterest":"10659.509","symbol":"BTCUSDT","time":1589437530011}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestResponse {
    /// Open contracts.
    pub open_interest: Decimal,

    /// Symbol.
    pub symbol: String,

    /// Exchange time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

// =============================================================================
// Envelope
// =============================================================================

/// Minimal view used to route a frame before full decoding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventHeader {
    /// Event type, absent on subscription acks.
    #[serde(rename = "e")]
    pub event_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn kline_event_deserializes() {
        let json = r#"{"e":"kline","E":1638747660000,"s":"BTCUSDT","k":{"t":1638747660000,
            "T":1638747719999,"s":"BTCUSDT","i":"1m","f":100,"L":200,"o":"0.0010","c":"0.0020",
            "h":"0.0025","l":"0.0015","v":"1000","n":100,"x":false,"q":"1.0000","V":"500",
            "Q":"0.500","B":"123456"}}"#;

        let event: KlineEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.symbol, "BTCUSDT");
        assert_eq!(event.kline.interval, "1m");
        assert_eq!(event.kline.high, dec!(0.0025));
        assert_eq!(event.kline.trade_count, 100);
        assert!(!event.kline.is_closed);
        assert_eq!(event.kline.open_time.timestamp_millis(), 1_638_747_660_000);
    }

    #[test]
    fn agg_trade_event_deserializes() {
        let json = r#"{"e":"aggTrade","E":123456789,"s":"BTCUSDT","a":5933014,"p":"0.001",
            "q":"100","f":100,"l":105,"T":123456785,"m":true}"#;

        let event: AggTradeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.agg_id, 5_933_014);
        assert_eq!(event.price, dec!(0.001));
        assert!(event.is_buyer_maker);
    }

    #[test]
    fn mark_price_event_deserializes() {
        let json = r#"{"e":"markPriceUpdate","E":1562305380000,"s":"BTCUSDT","p":"11794.15",
            "i":"11784.62","P":"11784.25","r":"0.00038167","T":1562306400000}"#;

        let event: MarkPriceEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.mark_price, dec!(11794.15));
        assert_eq!(event.funding_rate, dec!(0.00038167));
    }

    #[test]
    fn open_interest_response_deserializes() {
        let json = r#"{"openInterest":"10659.509","symbol":"BTCUSDT","time":1589437530011}"#;

        let response: OpenInterestResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.open_interest, dec!(10659.509));
        assert_eq!(response.time.timestamp_millis(), 1_589_437_530_011);
    }

    #[test]
    fn header_tolerates_acks() {
        let header: EventHeader = serde_json::from_str(r#"{"result":null,"id":1}"#).unwrap();
        assert_eq!(header.event_type, None);
    }
}
