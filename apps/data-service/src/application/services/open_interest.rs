//! Open Interest Manager
//!
//! Poll-based counterpart to [`LiveStreamManager`](super::live_stream::LiveStreamManager).
//! The first subscriber for a symbol starts a fixed-interval poll task; every
//! tick fetches the current open interest and fans out an update carrying
//! the change since the previous sample.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::listeners::Listener;
use super::live_stream::{LiveStreamError, Subscription};
use super::stream_registry::{Detach, StreamRegistry};
use crate::application::ports::OpenInterestSource;
use crate::domain::streaming::{DataKind, OpenInterestUpdate, StreamEvent};
use crate::domain::subscription::{ListenerId, SubscriptionKey, SubscriptionStats};
use crate::infrastructure::metrics;

/// Open interest polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenInterestConfig {
    /// Time between polls.
    pub poll_interval: Duration,
}

impl Default for OpenInterestConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
        }
    }
}

struct Inner {
    source: Arc<dyn OpenInterestSource>,
    config: OpenInterestConfig,
    registry: StreamRegistry<OpenInterestUpdate>,
    shutdown: CancellationToken,
}

/// Reference-counted open interest polling. Cheap to clone.
#[derive(Clone)]
pub struct OpenInterestManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OpenInterestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenInterestManager")
            .field("poll_interval", &self.inner.config.poll_interval)
            .field("stats", &self.inner.registry.stats())
            .finish_non_exhaustive()
    }
}

impl OpenInterestManager {
    /// Create a manager polling `source`.
    #[must_use]
    pub fn new(source: Arc<dyn OpenInterestSource>, config: OpenInterestConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                registry: StreamRegistry::new(DataKind::OpenInterest, 1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Data kind served.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        DataKind::OpenInterest
    }

    /// Register a listener for `key`, starting the poll task if this is the first.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the key carries a timeframe, or `ShuttingDown`
    /// after [`Self::shutdown`].
    pub fn subscribe(
        &self,
        key: &SubscriptionKey,
        on_update: Listener<OpenInterestUpdate>,
    ) -> Result<Subscription<OpenInterestUpdate>, LiveStreamError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(LiveStreamError::ShuttingDown);
        }
        if key.timeframe().is_some() {
            return Err(LiveStreamError::InvalidKey {
                key: key.to_string(),
                reason: format!("{} subscriptions take no timeframe", self.kind()),
            });
        }

        let id = ListenerId::next();
        let inner = Arc::clone(&self.inner);
        let current = self.inner.registry.attach(
            key,
            id,
            on_update,
            None,
            &self.inner.shutdown,
            |generation, cancel| {
                let key = key.clone();
                tokio::spawn(run_poll(inner, key, generation, cancel))
            },
        );

        tracing::debug!(key = %key, listener = %id, "Subscribed to open interest");
        Ok(Subscription { id, current })
    }

    /// Remove one subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, key: &SubscriptionKey, id: ListenerId) -> bool {
        self.inner.registry.detach(key, id) != Detach::Unknown
    }

    /// Latest sample.
    #[must_use]
    pub fn current(&self, key: &SubscriptionKey) -> Option<OpenInterestUpdate> {
        self.inner.registry.current(key)
    }

    /// Symbols being polled.
    #[must_use]
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.inner.registry.active_keys()
    }

    /// Subscription counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.inner.registry.stats()
    }

    /// Stop every poll task and refuse new subscriptions.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tasks = self.inner.registry.drain();
        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "Open interest poll task panicked");
            }
        }
        tracing::info!("Open interest manager stopped");
    }
}

async fn run_poll(inner: Arc<Inner>, key: SubscriptionKey, generation: u64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous: Option<Decimal> = None;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if !inner.registry.is_live(&key, generation) {
            return;
        }

        let fetched = tokio::select! {
            () = cancel.cancelled() => return,
            result = inner.source.fetch(key.symbol()) => result,
        };

        match fetched {
            Ok(sample) => {
                let delta = previous.map_or(Decimal::ZERO, |p| sample.open_interest - p);
                previous = Some(sample.open_interest);
                metrics::record_stream_message(DataKind::OpenInterest);

                let update = OpenInterestUpdate {
                    symbol: key.symbol().to_string(),
                    open_interest: sample.open_interest,
                    delta,
                    time: sample.time,
                };
                inner
                    .registry
                    .publish(&key, generation, StreamEvent::Update(update));
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Open interest poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::super::listeners::listener;
    use super::*;
    use crate::application::ports::{OpenInterestSample, UpstreamError};

    /// Replays scripted samples, then repeats the last one.
    #[derive(Default)]
    struct ScriptedSource {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<Decimal, UpstreamError>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Decimal, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl OpenInterestSource for ScriptedSource {
        async fn fetch(&self, _symbol: &str) -> Result<OpenInterestSample, UpstreamError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or(Ok(Decimal::ZERO))?;
            Ok(OpenInterestSample {
                open_interest: next,
                time: DateTime::<Utc>::from_timestamp(n as i64, 0).unwrap(),
            })
        }
    }

    fn key() -> SubscriptionKey {
        "ETHUSDT".parse().unwrap()
    }

    fn manager(source: &Arc<ScriptedSource>) -> OpenInterestManager {
        OpenInterestManager::new(
            Arc::clone(source) as Arc<dyn OpenInterestSource>,
            OpenInterestConfig::default(),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_timeframe() {
        let source = ScriptedSource::new(vec![]);
        let manager = manager(&source);
        let key: SubscriptionKey = "ETHUSDT:1m".parse().unwrap();
        assert!(matches!(
            manager.subscribe(&key, listener(|_| Ok(()))),
            Err(LiveStreamError::InvalidKey { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deltas_track_previous_sample_and_skip_failures() {
        let source = ScriptedSource::new(vec![
            Ok(dec!(100)),
            Ok(dec!(110)),
            Err(UpstreamError::Request("503".into())),
            Ok(dec!(105)),
        ]);
        let manager = manager(&source);
        let deltas = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&deltas);
        manager
            .subscribe(
                &key(),
                listener(move |u: &OpenInterestUpdate| {
                    seen.lock().push(u.delta);
                    Ok(())
                }),
            )
            .unwrap();

        settle().await;
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(15)).await;
            settle().await;
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(*deltas.lock(), vec![dec!(0), dec!(10), dec!(-5)]);
        assert_eq!(
            manager.current(&key()).map(|u| u.open_interest),
            Some(dec!(105))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_after_last_unsubscribe() {
        let source = ScriptedSource::new(vec![]);
        let manager = manager(&source);

        let a = manager.subscribe(&key(), listener(|_| Ok(()))).unwrap();
        let b = manager.subscribe(&key(), listener(|_| Ok(()))).unwrap();
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        manager.unsubscribe(&key(), a.id);
        tokio::time::sleep(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        manager.unsubscribe(&key(), b.id);
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(manager.current(&key()).is_none());
    }
}
