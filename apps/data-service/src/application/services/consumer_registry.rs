//! Consumer Registry
//!
//! Tracks attached clients and drives idle auto-shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! absent ──register──► registered ──heartbeat / ws──► live
//!    ▲                                                   │
//!    └────────── unregister / sweep (stale, no ws) ──────┘
//! ```
//!
//! When the last consumer leaves, a shutdown timer is armed for the idle
//! grace period. Any registration before it fires cancels it. If it fires
//! with the registry still empty, the owner's callback runs exactly once.
//!
//! All mutations serialize on one mutex: "check empty then arm" and
//! "cancel pending" never interleave. Each armed timer carries a generation
//! number so a timer that lost a race with a cancel cannot act on a newer
//! schedule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::domain::consumer::{ConsumerId, ConsumerInfo, ConsumerSnapshot};
use crate::infrastructure::metrics;

/// Callback invoked once when the service becomes idle.
pub type IdleCallback = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// Configuration
// =============================================================================

/// Consumer liveness and shutdown timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerRegistryConfig {
    /// Heartbeat age after which a consumer without a WebSocket is reaped.
    pub heartbeat_timeout: Duration,
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// Delay between becoming empty and invoking the idle callback.
    pub idle_grace: Duration,
}

impl Default for ConsumerRegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            idle_grace: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct PendingShutdown {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct RegistryState {
    consumers: HashMap<ConsumerId, ConsumerInfo>,
    pending: Option<PendingShutdown>,
    generation: u64,
    sweeper: Option<JoinHandle<()>>,
    stopped: bool,
}

impl RegistryState {
    fn cancel_pending(&mut self) -> bool {
        self.generation += 1;
        match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }
}

struct Inner {
    config: ConsumerRegistryConfig,
    state: Mutex<RegistryState>,
    on_idle: Mutex<Option<IdleCallback>>,
}

// =============================================================================
// Consumer Registry
// =============================================================================

/// Registry of attached consumers. Cheap to clone.
#[derive(Clone)]
pub struct ConsumerRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConsumerRegistry")
            .field("consumers", &state.consumers.len())
            .field("shutdown_pending", &state.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl ConsumerRegistry {
    /// Create a registry that calls `on_idle` once when the service goes idle.
    #[must_use]
    pub fn new(config: ConsumerRegistryConfig, on_idle: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(RegistryState::default()),
                on_idle: Mutex::new(Some(Box::new(on_idle))),
            }),
        }
    }

    /// Timing configuration.
    #[must_use]
    pub fn config(&self) -> ConsumerRegistryConfig {
        self.inner.config
    }

    /// Start the periodic heartbeat sweep. Requires a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.sweeper.is_some() || state.stopped {
            return;
        }

        let registry = self.clone();
        let period = self.inner.config.sweep_interval;
        state.sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                registry.sweep_expired();
            }
        }));

        tracing::debug!(
            interval_secs = period.as_secs(),
            timeout_secs = self.inner.config.heartbeat_timeout.as_secs(),
            "Consumer sweep started"
        );
    }

    /// Stop the sweep and any pending shutdown timer.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.stopped = true;
        state.cancel_pending();
        if let Some(sweeper) = state.sweeper.take() {
            sweeper.abort();
        }
    }

    /// Register or refresh a consumer. Returns `true` if it was new.
    ///
    /// Cancels a pending idle shutdown.
    pub fn register(&self, id: ConsumerId, display_name: &str, pid: Option<u32>) -> bool {
        let mut state = self.inner.state.lock();

        let is_new = match state.consumers.get_mut(&id) {
            Some(existing) => {
                existing.display_name = display_name.to_string();
                existing.pid = pid;
                existing.touch();
                false
            }
            None => {
                state
                    .consumers
                    .insert(id.clone(), ConsumerInfo::new(id.clone(), display_name, pid));
                true
            }
        };

        if state.cancel_pending() {
            tracing::info!(consumer = %id, "Idle shutdown cancelled");
        }
        metrics::set_consumers(state.consumers.len());
        drop(state);

        tracing::info!(consumer = %id, name = display_name, pid, is_new, "Consumer registered");
        is_new
    }

    /// Remove a consumer. Returns whether it was registered.
    pub fn unregister(&self, id: &ConsumerId) -> bool {
        let mut state = self.inner.state.lock();
        let removed = state.consumers.remove(id).is_some();
        metrics::set_consumers(state.consumers.len());
        self.check_for_shutdown_locked(&mut state);
        drop(state);

        if removed {
            tracing::info!(consumer = %id, "Consumer unregistered");
        }
        removed
    }

    /// Refresh a consumer's heartbeat. Unknown ids are ignored.
    pub fn heartbeat(&self, id: &ConsumerId) -> bool {
        let mut state = self.inner.state.lock();
        match state.consumers.get_mut(id) {
            Some(consumer) => {
                consumer.touch();
                true
            }
            None => {
                tracing::debug!(consumer = %id, "Heartbeat from unknown consumer");
                false
            }
        }
    }

    /// Record WebSocket liveness. Connected consumers are exempt from the sweep.
    pub fn set_ws_connected(&self, id: &ConsumerId, connected: bool) -> bool {
        let mut state = self.inner.state.lock();
        let Some(consumer) = state.consumers.get_mut(id) else {
            return false;
        };
        consumer.ws_connected = connected;
        consumer.touch();
        drop(state);

        tracing::debug!(consumer = %id, connected, "Consumer WebSocket state changed");
        true
    }

    /// Reap consumers whose heartbeat expired without a WebSocket.
    ///
    /// Returns the removed ids.
    pub fn sweep_expired(&self) -> Vec<ConsumerId> {
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        let timeout = self.inner.config.heartbeat_timeout;

        let expired: Vec<ConsumerId> = state
            .consumers
            .values()
            .filter(|c| c.is_expired(now, timeout))
            .map(|c| c.id.clone())
            .collect();

        if expired.is_empty() {
            return expired;
        }

        for id in &expired {
            state.consumers.remove(id);
        }
        metrics::set_consumers(state.consumers.len());
        metrics::record_consumers_reaped(expired.len() as u64);
        self.check_for_shutdown_locked(&mut state);
        drop(state);

        for id in &expired {
            tracing::info!(consumer = %id, "Consumer heartbeat expired");
        }
        expired
    }

    /// Arm the idle timer if no consumer remains and none is armed.
    pub fn check_for_shutdown(&self) {
        let mut state = self.inner.state.lock();
        self.check_for_shutdown_locked(&mut state);
    }

    fn check_for_shutdown_locked(&self, state: &mut RegistryState) {
        if state.stopped || !state.consumers.is_empty() || state.pending.is_some() {
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        let grace = self.inner.config.idle_grace;
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            fire_idle(&inner, generation);
        });
        state.pending = Some(PendingShutdown { generation, handle });

        tracing::info!(grace_secs = grace.as_secs(), "No consumers left, shutdown scheduled");
    }

    /// Whether an idle shutdown is armed.
    #[must_use]
    pub fn is_shutdown_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// Look up one consumer.
    #[must_use]
    pub fn get(&self, id: &ConsumerId) -> Option<ConsumerInfo> {
        self.inner.state.lock().consumers.get(id).cloned()
    }

    /// Snapshot of all consumers, ordered by id.
    #[must_use]
    pub fn consumers(&self) -> Vec<ConsumerSnapshot> {
        let state = self.inner.state.lock();
        let mut consumers: Vec<_> = state.consumers.values().map(ConsumerInfo::snapshot).collect();
        drop(state);
        consumers.sort_by(|a, b| a.id.cmp(&b.id));
        consumers
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().consumers.len()
    }

    /// Whether no consumer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fire_idle(inner: &Inner, generation: u64) {
    {
        let mut state = inner.state.lock();
        let current = state.pending.as_ref().map(|p| p.generation);
        if current != Some(generation) {
            return;
        }
        state.pending = None;
        if state.stopped || !state.consumers.is_empty() {
            return;
        }
    }

    let callback = inner.on_idle.lock().take();
    if let Some(callback) = callback {
        tracing::info!("Idle grace elapsed with no consumers, shutting down");
        callback();
    }
}
