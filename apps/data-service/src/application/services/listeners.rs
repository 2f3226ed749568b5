//! Listener Fan-out
//!
//! Typed listener sets for live stream subscriptions. Dispatch runs against
//! a snapshot taken under the owner's lock, so callbacks execute with no lock
//! held. Each callback is isolated: an `Err` or a panic is logged and counted,
//! and the remaining listeners still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::domain::streaming::DataKind;
use crate::domain::subscription::{ListenerId, SubscriptionKey};
use crate::infrastructure::metrics;

/// Callback invoked with each value delivered to a subscription.
pub type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<T, F>(f: F) -> Listener<T>
where
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered set of listeners keyed by subscriber.
pub struct ListenerSet<T> {
    entries: Vec<(ListenerId, Listener<T>)>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<T> ListenerSet<T> {
    /// Add a listener for `id`, replacing any previous one.
    pub fn insert(&mut self, id: ListenerId, listener: Listener<T>) {
        self.remove(id);
        self.entries.push((id, listener));
    }

    /// Remove the listener for `id`. Returns whether it was present.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    /// Whether `id` has a listener here.
    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|(existing, _)| *existing == id)
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone the listeners for dispatch outside the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Listener<T>> {
        self.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Invoke every listener with `value`. Returns the number that failed.
pub fn dispatch<T>(
    kind: DataKind,
    key: &SubscriptionKey,
    listeners: &[Listener<T>],
    value: &T,
) -> usize {
    let mut failures = 0;

    for listener in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener(value))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                metrics::record_listener_failure(kind);
                tracing::warn!(kind = %kind, key = %key, error = %e, "Listener failed");
            }
            Err(panic) => {
                failures += 1;
                metrics::record_listener_failure(kind);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(kind = %kind, key = %key, panic = %message, "Listener panicked");
            }
        }
    }

    failures
}
