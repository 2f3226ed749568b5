//! Stream Decoders
//!
//! [`StreamDecoder`] implementations for the Binance push streams. Each one
//! names the upstream stream for a subscription key and turns a JSON text
//! frame into a domain payload.
//!
//! | Decoder             | Key            | Stream                      |
//! |---------------------|----------------|-----------------------------|
//! | `KlineDecoder`      | `SYMBOL:tf`    | `<symbol>@kline_<tf>`       |
//! | `AggTradeDecoder`   | `SYMBOL`       | `<symbol>@aggTrade`         |
//! | `MarkPriceDecoder`  | `SYMBOL`       | `<symbol>@markPrice@1s`     |

use super::messages::{AggTradeEvent, EventHeader, KlineEvent, MarkPriceEvent};
use crate::application::ports::{CodecError, StreamDecoder};
use crate::application::services::LiveStreamManager;
use crate::domain::streaming::{AggTrade, Candle, DataKind, MarkPrice, StreamEvent, Timeframe};
use crate::domain::subscription::SubscriptionKey;

/// Candle stream manager.
pub type CandleStreamManager = LiveStreamManager<KlineDecoder>;

/// Aggregated trade stream manager.
pub type AggTradeStreamManager = LiveStreamManager<AggTradeDecoder>;

/// Mark price stream manager.
pub type MarkPriceStreamManager = LiveStreamManager<MarkPriceDecoder>;

/// Read the event type, or `None` for frames without one.
fn event_type(text: &str) -> Result<Option<String>, CodecError> {
    let header: EventHeader = serde_json::from_str(text)?;
    Ok(header.event_type)
}

// =============================================================================
// Kline
// =============================================================================

/// Decodes `kline` events into [`Candle`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct KlineDecoder;

impl StreamDecoder for KlineDecoder {
    type Item = Candle;

    fn kind(&self) -> DataKind {
        DataKind::Candles
    }

    fn validate(&self, key: &SubscriptionKey) -> Result<(), String> {
        let Some(tf) = key.timeframe() else {
            return Err("candle subscriptions require a timeframe".to_string());
        };
        tf.parse::<Timeframe>().map(|_| ()).map_err(|e| e.to_string())
    }

    fn stream_name(&self, key: &SubscriptionKey) -> String {
        format!(
            "{}@kline_{}",
            key.symbol().to_lowercase(),
            key.timeframe().unwrap_or_default()
        )
    }

    fn decode(&self, text: &str) -> Result<Option<StreamEvent<Candle>>, CodecError> {
        if event_type(text)?.as_deref() != Some("kline") {
            return Ok(None);
        }
        let event: KlineEvent = serde_json::from_str(text)?;
        let k = event.kline;

        let timeframe = k
            .interval
            .parse::<Timeframe>()
            .map_err(|e| CodecError::InvalidField {
                field: "k.i",
                reason: e.to_string(),
            })?;

        let candle = Candle {
            symbol: event.symbol.to_uppercase(),
            timeframe,
            open_time: k.open_time,
            close_time: k.close_time,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            quote_volume: k.quote_volume,
            trade_count: k.trade_count,
            is_closed: k.is_closed,
        };

        Ok(Some(if candle.is_closed {
            StreamEvent::Close(candle)
        } else {
            StreamEvent::Update(candle)
        }))
    }
}

// =============================================================================
// Aggregate Trade
// =============================================================================

/// Decodes `aggTrade` events into [`AggTrade`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct AggTradeDecoder;

impl StreamDecoder for AggTradeDecoder {
    type Item = AggTrade;

    fn kind(&self) -> DataKind {
        DataKind::AggTrades
    }

    fn stream_name(&self, key: &SubscriptionKey) -> String {
        format!("{}@aggTrade", key.symbol().to_lowercase())
    }

    fn decode(&self, text: &str) -> Result<Option<StreamEvent<AggTrade>>, CodecError> {
        if event_type(text)?.as_deref() != Some("aggTrade") {
            return Ok(None);
        }
        let event: AggTradeEvent = serde_json::from_str(text)?;

        Ok(Some(StreamEvent::Update(AggTrade {
            symbol: event.symbol.to_uppercase(),
            agg_id: event.agg_id,
            price: event.price,
            quantity: event.quantity,
            first_trade_id: event.first_trade_id,
            last_trade_id: event.last_trade_id,
            trade_time: event.trade_time,
            is_buyer_maker: event.is_buyer_maker,
        })))
    }
}

// =============================================================================
// Mark Price
// =============================================================================

/// Decodes `markPriceUpdate` events into [`MarkPrice`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkPriceDecoder;

impl StreamDecoder for MarkPriceDecoder {
    type Item = MarkPrice;

    fn kind(&self) -> DataKind {
        DataKind::MarkPrice
    }

    fn stream_name(&self, key: &SubscriptionKey) -> String {
        format!("{}@markPrice@1s", key.symbol().to_lowercase())
    }

    fn decode(&self, text: &str) -> Result<Option<StreamEvent<MarkPrice>>, CodecError> {
        if event_type(text)?.as_deref() != Some("markPriceUpdate") {
            return Ok(None);
        }
        let event: MarkPriceEvent = serde_json::from_str(text)?;

        Ok(Some(StreamEvent::Update(MarkPrice {
            symbol: event.symbol.to_uppercase(),
            mark_price: event.mark_price,
            index_price: event.index_price,
            funding_rate: event.funding_rate,
            next_funding_time: event.next_funding_time,
            event_time: event.event_time,
        })))
    }
}
