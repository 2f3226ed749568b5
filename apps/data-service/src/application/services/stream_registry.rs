//! Per-key Stream State
//!
//! Bookkeeping shared by every live stream manager: the current value, the
//! ring of recently closed values, listener sets and the handle of the task
//! feeding the key. A key's entry exists iff at least one subscriber is
//! attached, and the feeding task exists iff the entry does.
//!
//! Every entry carries a generation number. A feeding task only publishes
//! (and only reconnects) while the entry it was spawned for is still the
//! live one, so a task outliving a teardown and re-subscribe stays inert.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::listeners::{Listener, ListenerSet, dispatch};
use crate::domain::streaming::{DataKind, StreamEvent, StreamItem};
use crate::domain::subscription::{ListenerId, SubscriptionKey, SubscriptionStats};
use crate::infrastructure::metrics;

/// Result of detaching a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// Key or subscriber not found.
    Unknown,
    /// Subscriber removed, others remain.
    Removed,
    /// Last subscriber removed; upstream torn down.
    TornDown,
}

struct KeyState<T> {
    current: Option<T>,
    closed: VecDeque<T>,
    on_update: ListenerSet<T>,
    on_close: ListenerSet<T>,
    generation: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Keyed stream state for one data kind.
pub struct StreamRegistry<T: StreamItem> {
    kind: DataKind,
    closed_capacity: usize,
    keys: Mutex<HashMap<SubscriptionKey, KeyState<T>>>,
    generations: AtomicU64,
}

impl<T: StreamItem> StreamRegistry<T> {
    /// Create an empty registry retaining `closed_capacity` closed values per key.
    #[must_use]
    pub fn new(kind: DataKind, closed_capacity: usize) -> Self {
        Self {
            kind,
            closed_capacity: closed_capacity.max(1),
            keys: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Data kind served.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        self.kind
    }

    /// Attach a subscriber, spawning the feeding task if the key is new.
    ///
    /// `spawn` receives the entry generation and a cancellation token scoped
    /// to the entry. Returns the cached current value.
    pub fn attach<F>(
        &self,
        key: &SubscriptionKey,
        id: ListenerId,
        on_update: Listener<T>,
        on_close: Option<Listener<T>>,
        parent: &CancellationToken,
        spawn: F,
    ) -> Option<T>
    where
        F: FnOnce(u64, CancellationToken) -> JoinHandle<()>,
    {
        let mut keys = self.keys.lock();

        let state = keys.entry(key.clone()).or_insert_with(|| {
            let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
            let cancel = parent.child_token();
            let task = spawn(generation, cancel.clone());
            tracing::info!(kind = %self.kind, key = %key, "Upstream opened");
            KeyState {
                current: None,
                closed: VecDeque::with_capacity(self.closed_capacity),
                on_update: ListenerSet::default(),
                on_close: ListenerSet::default(),
                generation,
                cancel,
                task: Some(task),
            }
        });

        state.on_update.insert(id, on_update);
        if let Some(on_close) = on_close {
            state.on_close.insert(id, on_close);
        }
        let current = state.current.clone();

        metrics::set_live_connections(self.kind, keys.len());
        current
    }

    /// Detach a subscriber, tearing the key down when none remain.
    pub fn detach(&self, key: &SubscriptionKey, id: ListenerId) -> Detach {
        let mut keys = self.keys.lock();
        let Some(state) = keys.get_mut(key) else {
            return Detach::Unknown;
        };

        let had_update = state.on_update.remove(id);
        let had_close = state.on_close.remove(id);
        if !had_update && !had_close {
            return Detach::Unknown;
        }
        if !state.on_update.is_empty() || !state.on_close.is_empty() {
            return Detach::Removed;
        }

        if let Some(state) = keys.remove(key) {
            state.cancel.cancel();
        }
        metrics::set_live_connections(self.kind, keys.len());
        drop(keys);

        tracing::info!(kind = %self.kind, key = %key, "Upstream torn down");
        Detach::TornDown
    }

    /// Whether the entry spawned with `generation` is still live.
    #[must_use]
    pub fn is_live(&self, key: &SubscriptionKey, generation: u64) -> bool {
        self.keys
            .lock()
            .get(key)
            .is_some_and(|s| s.generation == generation && !s.cancel.is_cancelled())
    }

    /// Apply an event to the key's state and fan it out.
    ///
    /// Updates go to update listeners, closes to close listeners. Listeners
    /// run after the lock is released. Returns the number of listeners invoked.
    pub fn publish(&self, key: &SubscriptionKey, generation: u64, event: StreamEvent<T>) -> usize {
        let (listeners, value) = {
            let mut keys = self.keys.lock();
            let Some(state) = keys.get_mut(key) else {
                return 0;
            };
            if state.generation != generation {
                return 0;
            }

            match event {
                StreamEvent::Update(value) => {
                    state.current = Some(value.clone());
                    (state.on_update.snapshot(), value)
                }
                StreamEvent::Close(value) => {
                    state.current = Some(value.clone());
                    retain_closed(&mut state.closed, value.clone(), self.closed_capacity);
                    (state.on_close.snapshot(), value)
                }
            }
        };

        dispatch(self.kind, key, &listeners, &value);
        listeners.len()
    }

    /// Cached current value.
    #[must_use]
    pub fn current(&self, key: &SubscriptionKey) -> Option<T> {
        self.keys.lock().get(key).and_then(|s| s.current.clone())
    }

    /// Recently closed values, oldest first.
    #[must_use]
    pub fn recent_closed(&self, key: &SubscriptionKey) -> Vec<T> {
        self.keys
            .lock()
            .get(key)
            .map(|s| s.closed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys with a live upstream, sorted.
    #[must_use]
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.keys.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Subscription counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let keys = self.keys.lock();
        SubscriptionStats {
            key_count: keys.len(),
            listener_count: keys.values().map(|s| s.on_update.len()).sum(),
        }
    }

    /// Cancel and remove every entry, returning the feeding tasks.
    pub fn drain(&self) -> Vec<JoinHandle<()>> {
        let mut keys = self.keys.lock();
        let tasks = keys
            .drain()
            .filter_map(|(_, mut state)| {
                state.cancel.cancel();
                state.task.take()
            })
            .collect();
        metrics::set_live_connections(self.kind, 0);
        tasks
    }
}

/// Append a closed value, replacing the tail when it describes the same instant.
fn retain_closed<T: StreamItem>(ring: &mut VecDeque<T>, value: T, capacity: usize) {
    if ring
        .back()
        .is_some_and(|last| last.timestamp() == value.timestamp())
    {
        ring.pop_back();
    }
    ring.push_back(value);
    while ring.len() > capacity {
        ring.pop_front();
    }
}
