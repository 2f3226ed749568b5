//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamConnector`: Opens a text-frame stream for a named exchange stream
//! - `StreamDecoder`: Maps subscription keys to stream names and decodes frames
//! - `OpenInterestSource`: Fetches a point-in-time open interest sample

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;

use crate::domain::streaming::{DataKind, StreamEvent, StreamItem};
use crate::domain::subscription::SubscriptionKey;

// =============================================================================
// Errors
// =============================================================================

/// Upstream transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Connection broke while reading.
    #[error("transport error: {0}")]
    Transport(String),
    /// Request to a polled upstream failed.
    #[error("request failed: {0}")]
    Request(String),
}

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame was not valid JSON for the expected schema.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field held a value outside its domain.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

// =============================================================================
// Push Streams
// =============================================================================

/// Stream of raw text frames from one upstream connection.
///
/// The stream ending means the server closed the connection.
pub type FrameStream = BoxStream<'static, Result<String, UpstreamError>>;

/// Opens upstream connections.
#[async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Connect to the named stream.
    async fn connect(&self, stream: &str) -> Result<FrameStream, UpstreamError>;
}

/// Knows one exchange stream family: naming and payload decoding.
pub trait StreamDecoder: Send + Sync + 'static {
    /// Decoded payload.
    type Item: StreamItem;

    /// Data kind served.
    fn kind(&self) -> DataKind;

    /// Reject keys this stream cannot serve.
    ///
    /// The default checks the timeframe requirement of [`Self::kind`].
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the key is unusable.
    fn validate(&self, key: &SubscriptionKey) -> Result<(), String> {
        match (self.kind().requires_timeframe(), key.timeframe()) {
            (true, None) => Err(format!("{} subscriptions require a timeframe", self.kind())),
            (false, Some(_)) => Err(format!("{} subscriptions take no timeframe", self.kind())),
            _ => Ok(()),
        }
    }

    /// Upstream stream name for a validated key.
    fn stream_name(&self, key: &SubscriptionKey) -> String;

    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for frames that carry no payload for this stream
    /// (acks, other event types).
    ///
    /// # Errors
    ///
    /// Returns `CodecError` for malformed frames.
    fn decode(&self, text: &str) -> Result<Option<StreamEvent<Self::Item>>, CodecError>;
}

// =============================================================================
// Polled Streams
// =============================================================================

/// One open interest observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenInterestSample {
    /// Open contracts.
    pub open_interest: Decimal,
    /// Exchange timestamp.
    pub time: DateTime<Utc>,
}

/// Fetches open interest for a symbol.
#[async_trait]
pub trait OpenInterestSource: Send + Sync + 'static {
    /// Fetch the current open interest.
    async fn fetch(&self, symbol: &str) -> Result<OpenInterestSample, UpstreamError>;
}
