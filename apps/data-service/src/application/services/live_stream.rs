//! Live Stream Manager
//!
//! Reference-counted upstream connections for push streams (candles,
//! aggregated trades, mark price). One manager serves one stream family,
//! described by its [`StreamDecoder`].
//!
//! # Connection Lifecycle
//!
//! ```text
//! subscribe (first) ──► spawn task ──► connect ──► read frames ──► decode ──► fan out
//!                                         ▲              │
//!                                         │        closed / error
//!                                         │              ▼
//!                                         └── key still live? ◄── wait reconnect delay
//! unsubscribe (last) ──► cancel task, drop key state
//! ```

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::listeners::Listener;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::stream_registry::{Detach, StreamRegistry};
use crate::application::ports::{StreamDecoder, UpstreamConnector};
use crate::domain::streaming::DataKind;
use crate::domain::subscription::{ListenerId, SubscriptionKey, SubscriptionStats};
use crate::infrastructure::metrics;

// =============================================================================
// Types
// =============================================================================

/// Live stream errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveStreamError {
    /// The key cannot be served by this stream.
    #[error("invalid subscription key {key}: {reason}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The manager is shutting down.
    #[error("live stream manager is shutting down")]
    ShuttingDown,
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription<T> {
    /// Identifies this subscriber's listeners for `unsubscribe`.
    pub id: ListenerId,
    /// Cached in-progress value at subscribe time.
    pub current: Option<T>,
}

/// Settings shared by the push managers.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStreamConfig {
    /// Delay schedule after an unsolicited close.
    pub reconnect: ReconnectConfig,
    /// Closed values retained per key.
    pub closed_capacity: usize,
}

impl Default for LiveStreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            closed_capacity: 10,
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

struct Inner<D: StreamDecoder> {
    decoder: D,
    connector: Arc<dyn UpstreamConnector>,
    reconnect: ReconnectConfig,
    registry: StreamRegistry<D::Item>,
    shutdown: CancellationToken,
}

/// Push stream manager for one decoder. Cheap to clone.
pub struct LiveStreamManager<D: StreamDecoder> {
    inner: Arc<Inner<D>>,
}

impl<D: StreamDecoder> Clone for LiveStreamManager<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: StreamDecoder> std::fmt::Debug for LiveStreamManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStreamManager")
            .field("kind", &self.inner.decoder.kind())
            .field("stats", &self.inner.registry.stats())
            .finish_non_exhaustive()
    }
}

impl<D: StreamDecoder> LiveStreamManager<D> {
    /// Create a manager over `connector`.
    #[must_use]
    pub fn new(decoder: D, connector: Arc<dyn UpstreamConnector>, config: LiveStreamConfig) -> Self {
        let registry = StreamRegistry::new(decoder.kind(), config.closed_capacity);
        Self {
            inner: Arc::new(Inner {
                decoder,
                connector,
                reconnect: config.reconnect,
                registry,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Data kind served.
    #[must_use]
    pub fn kind(&self) -> DataKind {
        self.inner.decoder.kind()
    }

    /// Register listeners for `key`, opening the upstream if this is the first.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the decoder rejects the key, or `ShuttingDown`
    /// after [`Self::shutdown`].
    pub fn subscribe(
        &self,
        key: &SubscriptionKey,
        on_update: Listener<D::Item>,
        on_close: Option<Listener<D::Item>>,
    ) -> Result<Subscription<D::Item>, LiveStreamError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(LiveStreamError::ShuttingDown);
        }
        self.inner
            .decoder
            .validate(key)
            .map_err(|reason| LiveStreamError::InvalidKey {
                key: key.to_string(),
                reason,
            })?;

        let id = ListenerId::next();
        let inner = Arc::clone(&self.inner);
        let current = self.inner.registry.attach(
            key,
            id,
            on_update,
            on_close,
            &self.inner.shutdown,
            |generation, cancel| {
                let key = key.clone();
                tokio::spawn(run_connection(inner, key, generation, cancel))
            },
        );

        tracing::debug!(kind = %self.kind(), key = %key, listener = %id, "Subscribed");
        Ok(Subscription { id, current })
    }

    /// Remove one subscriber's listeners. Returns whether it was registered.
    pub fn unsubscribe(&self, key: &SubscriptionKey, id: ListenerId) -> bool {
        let outcome = self.inner.registry.detach(key, id);
        tracing::debug!(kind = %self.kind(), key = %key, listener = %id, ?outcome, "Unsubscribed");
        outcome != Detach::Unknown
    }

    /// Cached in-progress value.
    #[must_use]
    pub fn current(&self, key: &SubscriptionKey) -> Option<D::Item> {
        self.inner.registry.current(key)
    }

    /// Recently closed values, oldest first.
    #[must_use]
    pub fn recent_closed(&self, key: &SubscriptionKey) -> Vec<D::Item> {
        self.inner.registry.recent_closed(key)
    }

    /// Keys with an open upstream.
    #[must_use]
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.inner.registry.active_keys()
    }

    /// Subscription counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.inner.registry.stats()
    }

    /// Close every upstream and refuse new subscriptions.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tasks = self.inner.registry.drain();
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(kind = %self.kind(), error = %e, "Connection task panicked");
            }
        }
        tracing::info!(kind = %self.kind(), closed = count, "Live stream manager stopped");
    }
}

// =============================================================================
// Connection Task
// =============================================================================

async fn run_connection<D: StreamDecoder>(
    inner: Arc<Inner<D>>,
    key: SubscriptionKey,
    generation: u64,
    cancel: CancellationToken,
) {
    let kind = inner.decoder.kind();
    let stream = inner.decoder.stream_name(&key);
    let mut policy = ReconnectPolicy::new(inner.reconnect);

    loop {
        let connected = tokio::select! {
            () = cancel.cancelled() => return,
            result = inner.connector.connect(&stream) => result,
        };

        match connected {
            Ok(mut frames) => {
                policy.reset();
                tracing::info!(kind = %kind, key = %key, stream = %stream, "Upstream connected");

                loop {
                    let frame = tokio::select! {
                        () = cancel.cancelled() => return,
                        frame = frames.next() => frame,
                    };
                    match frame {
                        Some(Ok(text)) => handle_frame(&inner, &key, generation, &text),
                        Some(Err(e)) => {
                            tracing::warn!(kind = %kind, key = %key, error = %e, "Upstream error");
                            break;
                        }
                        None => {
                            tracing::warn!(kind = %kind, key = %key, "Upstream closed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(kind = %kind, key = %key, error = %e, "Upstream connect failed");
            }
        }

        let delay = policy.next_delay();
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        if !inner.registry.is_live(&key, generation) {
            tracing::debug!(kind = %kind, key = %key, "Key released during reconnect delay");
            return;
        }

        metrics::record_reconnect(kind);
        tracing::info!(
            kind = %kind,
            key = %key,
            attempt = policy.attempt_count(),
            "Reconnecting upstream"
        );
    }
}

fn handle_frame<D: StreamDecoder>(
    inner: &Inner<D>,
    key: &SubscriptionKey,
    generation: u64,
    text: &str,
) {
    let kind = inner.decoder.kind();
    match inner.decoder.decode(text) {
        Ok(Some(event)) => {
            metrics::record_stream_message(kind);
            inner.registry.publish(key, generation, event);
        }
        Ok(None) => {
            metrics::record_frame_dropped(kind, "irrelevant");
            tracing::trace!(kind = %kind, key = %key, "Frame ignored");
        }
        Err(e) => {
            metrics::record_frame_dropped(kind, "malformed");
            tracing::warn!(kind = %kind, key = %key, error = %e, "Malformed frame dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use futures::channel::mpsc;
    use parking_lot::Mutex;

    use super::super::listeners::listener;
    use super::*;
    use crate::application::ports::{CodecError, FrameStream, UpstreamError};
    use crate::domain::streaming::{StreamEvent, StreamItem};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Price {
        at: i64,
        value: u32,
    }

    impl StreamItem for Price {
        fn timestamp(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(self.at, 0).unwrap()
        }
    }

    /// Frames look like `u:<at>:<value>` or `c:<at>:<value>`.
    struct TestDecoder;

    impl StreamDecoder for TestDecoder {
        type Item = Price;

        fn kind(&self) -> DataKind {
            DataKind::Candles
        }

        fn stream_name(&self, key: &SubscriptionKey) -> String {
            key.to_string()
        }

        fn decode(&self, text: &str) -> Result<Option<StreamEvent<Price>>, CodecError> {
            let parts: Vec<_> = text.split(':').collect();
            let invalid = |reason: &str| CodecError::InvalidField {
                field: "frame",
                reason: reason.to_string(),
            };
            let [tag, at, value] = parts.as_slice() else {
                return Err(invalid("shape"));
            };
            let price = Price {
                at: at.parse().map_err(|_| invalid("at"))?,
                value: value.parse().map_err(|_| invalid("value"))?,
            };
            match *tag {
                "u" => Ok(Some(StreamEvent::Update(price))),
                "c" => Ok(Some(StreamEvent::Close(price))),
                _ => Ok(None),
            }
        }
    }

    type Sender = mpsc::UnboundedSender<Result<String, UpstreamError>>;

    /// Hands out channel-backed streams and keeps the sending halves.
    #[derive(Default)]
    struct ChannelConnector {
        connects: AtomicUsize,
        senders: Mutex<HashMap<String, Vec<Sender>>>,
    }

    impl ChannelConnector {
        fn sender(&self, stream: &str) -> Option<Sender> {
            self.senders.lock().get(stream).and_then(|s| s.last().cloned())
        }
    }

    #[async_trait]
    impl UpstreamConnector for ChannelConnector {
        async fn connect(&self, stream: &str) -> Result<FrameStream, UpstreamError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded();
            self.senders.lock().entry(stream.to_string()).or_default().push(tx);
            Ok(rx.boxed())
        }
    }

    fn manager(connector: &Arc<ChannelConnector>) -> LiveStreamManager<TestDecoder> {
        LiveStreamManager::new(
            TestDecoder,
            Arc::clone(connector) as Arc<dyn UpstreamConnector>,
            LiveStreamConfig::default(),
        )
    }

    fn key() -> SubscriptionKey {
        "BTCUSDT:1m".parse().unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_key_without_timeframe() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = manager(&connector);
        let key: SubscriptionKey = "BTCUSDT".parse().unwrap();

        let err = manager.subscribe(&key, listener(|_| Ok(())), None).unwrap_err();
        assert!(matches!(err, LiveStreamError::InvalidKey { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_key_uses_one_connection() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = manager(&connector);

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (f, s) = (Arc::clone(&first), Arc::clone(&second));

        let a = manager
            .subscribe(
                &key(),
                listener(move |_| {
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                None,
            )
            .unwrap();
        let b = manager
            .subscribe(
                &key(),
                listener(move |_| {
                    s.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                None,
            )
            .unwrap();
        settle().await;

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().listener_count, 2);

        assert!(manager.unsubscribe(&key(), a.id));
        assert_eq!(manager.active_keys(), vec![key()]);

        let tx = connector.sender("BTCUSDT:1m").unwrap();
        tx.unbounded_send(Ok("c:60:7".into())).unwrap();
        tx.unbounded_send(Ok("u:120:8".into())).unwrap();
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(manager.recent_closed(&key()).len(), 1);

        assert!(manager.unsubscribe(&key(), b.id));
        assert!(manager.active_keys().is_empty());
        assert!(manager.current(&key()).is_none());
        assert!(manager.recent_closed(&key()).is_empty());
        assert!(!manager.unsubscribe(&key(), b.id));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_fan_out_and_closed_values_are_retained() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = manager(&connector);
        let updates = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&updates);
        let closed = Arc::clone(&closes);
        let sub = manager
            .subscribe(
                &key(),
                listener(move |p: &Price| {
                    seen.lock().push(p.value);
                    Ok(())
                }),
                Some(listener(move |_| {
                    closed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();
        assert_eq!(sub.current, None);
        settle().await;

        let tx = connector.sender("BTCUSDT:1m").unwrap();
        for frame in ["u:60:1", "garbage", "u:60:2", "x:60:0", "u:60:3", "c:60:4"] {
            tx.unbounded_send(Ok(frame.to_string())).unwrap();
        }
        settle().await;

        assert_eq!(*updates.lock(), vec![1, 2, 3]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.recent_closed(&key()).len(), 1);
        assert_eq!(manager.current(&key()).map(|p| p.value), Some(4));

        let late = manager.subscribe(&key(), listener(|_| Ok(())), None).unwrap();
        assert_eq!(late.current.map(|p| p.value), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_listener_does_not_block_others() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = manager(&connector);
        let delivered = Arc::new(AtomicUsize::new(0));

        manager
            .subscribe(&key(), listener(|_| Err(anyhow::anyhow!("broken"))), None)
            .unwrap();
        let counter = Arc::clone(&delivered);
        manager
            .subscribe(
                &key(),
                listener(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                None,
            )
            .unwrap();
        settle().await;

        connector
            .sender("BTCUSDT:1m")
            .unwrap()
            .unbounded_send(Ok("u:60:1".into()))
            .unwrap();
        settle().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_delay_while_subscribed() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = manager(&connector);
        manager.subscribe(&key(), listener(|_| Ok(())), None).unwrap();
        settle().await;

        // Dropping every sender ends the stream.
        connector.senders.lock().clear();
        settle().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_after_last_unsubscribe() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = manager(&connector);
        let sub = manager.subscribe(&key(), listener(|_| Ok(())), None).unwrap();
        settle().await;

        connector.senders.lock().clear();
        settle().await;
        manager.unsubscribe(&key(), sub.id);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_refuses_new_subscriptions() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = manager(&connector);
        manager.subscribe(&key(), listener(|_| Ok(())), None).unwrap();
        settle().await;

        manager.shutdown().await;
        assert!(manager.active_keys().is_empty());
        assert_eq!(
            manager.subscribe(&key(), listener(|_| Ok(())), None).unwrap_err(),
            LiveStreamError::ShuttingDown
        );
    }
}
