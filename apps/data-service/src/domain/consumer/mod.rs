//! Consumer Types
//!
//! A consumer is a client application attached to the service. Consumers
//! stay alive either by heartbeating or by holding an open WebSocket; the
//! service shuts down once none remain.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Client-chosen consumer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    /// Wrap an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Registered consumer.
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    /// Identifier.
    pub id: ConsumerId,
    /// Human-readable name for status output.
    pub display_name: String,
    /// OS process id of the client, when known.
    pub pid: Option<u32>,
    /// Last heartbeat, registration or WebSocket state change.
    pub last_heartbeat: Instant,
    /// Whether the consumer holds a live WebSocket.
    pub ws_connected: bool,
    /// Wall-clock registration time.
    pub registered_at: DateTime<Utc>,
}

impl ConsumerInfo {
    /// Create a freshly registered consumer.
    #[must_use]
    pub fn new(id: ConsumerId, display_name: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            pid,
            last_heartbeat: Instant::now(),
            ws_connected: false,
            registered_at: Utc::now(),
        }
    }

    /// Refresh the heartbeat timestamp.
    pub fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    /// Whether the sweep should reap this consumer.
    ///
    /// WebSocket-connected consumers never expire.
    #[must_use]
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        !self.ws_connected && now.saturating_duration_since(self.last_heartbeat) > timeout
    }

    /// Serializable view for status output.
    #[must_use]
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            pid: self.pid,
            ws_connected: self.ws_connected,
            registered_at: self.registered_at,
            idle_secs: self.last_heartbeat.elapsed().as_secs(),
        }
    }
}

/// Point-in-time view of a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerSnapshot {
    /// Identifier.
    pub id: ConsumerId,
    /// Display name.
    pub display_name: String,
    /// Client process id.
    pub pid: Option<u32>,
    /// WebSocket liveness.
    pub ws_connected: bool,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Seconds since the last heartbeat.
    pub idle_secs: u64,
}
