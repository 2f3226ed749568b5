//! WebSocket Connector
//!
//! Opens one raw Binance stream per connection at `<base>/ws/<stream>`.
//! Server pings are answered inline; the returned frame stream ends when the
//! server closes the socket.
//!
//! # Stream URL
//!
//! - Production: `wss://fstream.binance.com/ws/<stream>`
//! - Testnet: `wss://stream.binancefuture.com/ws/<stream>`

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream};
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{FrameStream, UpstreamConnector, UpstreamError};

/// Default futures stream endpoint.
pub const DEFAULT_WS_BASE_URL: &str = "wss://fstream.binance.com";

/// [`UpstreamConnector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_WS_BASE_URL)
    }
}

impl WsConnector {
    /// Create a connector for `base_url` (no trailing `/ws`).
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Full URL for a stream name.
    #[must_use]
    pub fn stream_url(&self, stream: &str) -> String {
        format!("{}/ws/{stream}", self.base_url)
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    async fn connect(&self, stream_name: &str) -> Result<FrameStream, UpstreamError> {
        let url = self.stream_url(stream_name);
        tracing::debug!(url = %url, "Connecting to stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;
        let (write, read) = ws_stream.split();

        let frames = stream::unfold(Some((write, read)), |state| async move {
            let (mut write, mut read) = state?;
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Some((Ok(text.as_str().to_owned()), Some((write, read))));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return Some((Err(UpstreamError::Transport(e.to_string())), None));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Server sent close frame");
                        return None;
                    }
                    Some(Ok(_)) => {
                        // Ignore other message types
                    }
                    Some(Err(e)) => {
                        return Some((Err(UpstreamError::Transport(e.to_string())), None));
                    }
                    None => return None,
                }
            }
        });

        Ok(frames.boxed())
    }
}
