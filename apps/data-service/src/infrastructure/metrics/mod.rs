//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Consumers**: Registered client count, reaped consumers
//! - **Streams**: Live upstream connections, messages, dropped frames, reconnects
//! - **Listeners**: Callback failures during fan-out
//! - **API**: Outbound REST requests by outcome, circuit breaker trips
//! - **Metadata**: Catalog size after each sync
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::DataKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Safe to call more than once; later calls return the first handle. If a
/// different global recorder is already installed, the returned handle
/// renders an empty registry.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_metrics();
                handle
            }
            Err(e) => {
                tracing::warn!(error = %e, "Prometheus recorder not installed");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!("data_service_consumers", "Number of registered consumers");
    describe_counter!(
        "data_service_consumers_reaped_total",
        "Consumers removed by the heartbeat sweep"
    );

    describe_gauge!(
        "data_service_live_connections",
        "Number of open upstream streams by data kind"
    );
    describe_counter!(
        "data_service_stream_messages_total",
        "Decoded upstream messages by data kind"
    );
    describe_counter!(
        "data_service_frames_dropped_total",
        "Upstream frames discarded by data kind and reason"
    );
    describe_counter!(
        "data_service_listener_failures_total",
        "Listener callbacks that returned an error or panicked"
    );
    describe_counter!(
        "data_service_reconnects_total",
        "Upstream reconnection attempts by data kind"
    );

    describe_counter!(
        "data_service_api_requests_total",
        "Outbound REST requests by client and outcome"
    );
    describe_counter!(
        "data_service_circuit_open_total",
        "Times a circuit breaker opened"
    );
    describe_histogram!(
        "data_service_api_request_seconds",
        "Outbound REST request latency"
    );

    describe_gauge!(
        "data_service_metadata_entries",
        "Entries in the metadata catalog after the last sync"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for outbound REST requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOutcome {
    /// 2xx response.
    Success,
    /// 429 response.
    RateLimited,
    /// Retryable failure (5xx, 408, network).
    Retryable,
    /// Non-retryable 4xx.
    Rejected,
    /// Rejected locally by an open circuit.
    CircuitOpen,
}

impl ApiOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::Retryable => "retryable",
            Self::Rejected => "rejected",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

/// Update the registered consumer count.
#[allow(clippy::cast_precision_loss)]
pub fn set_consumers(count: usize) {
    gauge!("data_service_consumers").set(count as f64);
}

/// Record consumers reaped by the sweep.
pub fn record_consumers_reaped(count: u64) {
    counter!("data_service_consumers_reaped_total").increment(count);
}

/// Update the open upstream count for a data kind.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_connections(kind: DataKind, count: usize) {
    gauge!(
        "data_service_live_connections",
        "kind" => kind.as_str()
    )
    .set(count as f64);
}

/// Record a decoded upstream message.
pub fn record_stream_message(kind: DataKind) {
    counter!(
        "data_service_stream_messages_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a discarded upstream frame.
pub fn record_frame_dropped(kind: DataKind, reason: &'static str) {
    counter!(
        "data_service_frames_dropped_total",
        "kind" => kind.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a failed listener callback.
pub fn record_listener_failure(kind: DataKind) {
    counter!(
        "data_service_listener_failures_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect(kind: DataKind) {
    counter!(
        "data_service_reconnects_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record an outbound REST request.
pub fn record_api_request(client: &str, outcome: ApiOutcome, duration: Option<Duration>) {
    counter!(
        "data_service_api_requests_total",
        "client" => client.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    if let Some(duration) = duration {
        histogram!(
            "data_service_api_request_seconds",
            "client" => client.to_string()
        )
        .record(duration.as_secs_f64());
    }
}

/// Record a circuit breaker opening.
pub fn record_circuit_open(client: &str) {
    counter!(
        "data_service_circuit_open_total",
        "client" => client.to_string()
    )
    .increment(1);
}

/// Update the metadata catalog size.
#[allow(clippy::cast_precision_loss)]
pub fn set_metadata_entries(count: usize) {
    gauge!("data_service_metadata_entries").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
