//! Binance USDⓈ-M Futures Adapters
//!
//! - `websocket`: raw stream connections (`UpstreamConnector`)
//! - `codec`: kline, aggregate trade and mark price decoders (`StreamDecoder`)
//! - `open_interest`: REST open interest polling (`OpenInterestSource`)
//! - `messages`: wire format types

pub mod codec;
pub mod messages;
pub mod open_interest;
pub mod websocket;

pub use codec::{
    AggTradeDecoder, AggTradeStreamManager, CandleStreamManager, KlineDecoder, MarkPriceDecoder,
    MarkPriceStreamManager,
};
pub use open_interest::{BinanceOpenInterestSource, DEFAULT_REST_BASE_URL};
pub use websocket::{DEFAULT_WS_BASE_URL, WsConnector};
