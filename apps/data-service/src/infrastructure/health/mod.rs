//! Status and Metrics Endpoint
//!
//! Local HTTP endpoint reporting consumers, live subscriptions and upstream
//! health. Its bound port is the one published in the discovery file.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON service status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (not ready once idle shutdown is pending)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::{ServiceContext, ServiceStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// `/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Service status.
    #[serde(flatten)]
    pub service: ServiceStatus,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the status server.
#[derive(Debug)]
pub struct StatusServerState {
    started_at: Instant,
    context: Arc<ServiceContext>,
}

impl StatusServerState {
    /// Create server state over `context`.
    #[must_use]
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self {
            started_at: Instant::now(),
            context,
        }
    }
}

// =============================================================================
// Status Server
// =============================================================================

/// Status HTTP server bound to a local port.
#[derive(Debug)]
pub struct StatusServer {
    listener: TcpListener,
    port: u16,
    state: Arc<StatusServerState>,
    cancel: CancellationToken,
}

impl StatusServer {
    /// Bind `127.0.0.1:port` (0 picks a free port).
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the port is unavailable.
    pub async fn bind(
        port: u16,
        state: Arc<StatusServerState>,
        cancel: CancellationToken,
    ) -> Result<Self, StatusServerError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StatusServerError::BindFailed(port, e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| StatusServerError::BindFailed(port, e.to_string()))?
            .port();

        Ok(Self {
            listener,
            port,
            state,
            cancel,
        })
    }

    /// Port actually bound.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerFailed` if the HTTP server hits a fatal error.
    pub async fn run(self) -> Result<(), StatusServerError> {
        tracing::info!(port = self.port, "Status server listening");

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StatusServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

fn router(state: Arc<StatusServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    let response = HealthResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        service: state.context.status(),
    };
    (StatusCode::OK, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    if state.context.consumers.is_shutdown_pending() {
        (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING DOWN")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Status server errors.
#[derive(Debug, thiserror::Error)]
pub enum StatusServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::consumer::ConsumerId;
    use crate::infrastructure::config::ServiceConfig;

    async fn serve() -> (Arc<ServiceContext>, u16, CancellationToken) {
        let mut config = ServiceConfig::with_data_dir(std::env::temp_dir());
        config.metadata.enabled = false;
        let context = Arc::new(ServiceContext::build(config, || {}).unwrap());

        let cancel = CancellationToken::new();
        let server = StatusServer::bind(
            0,
            Arc::new(StatusServerState::new(Arc::clone(&context))),
            cancel.clone(),
        )
        .await
        .unwrap();
        let port = server.port();
        assert_ne!(port, 0);
        tokio::spawn(server.run());

        (context, port, cancel)
    }

    #[tokio::test]
    async fn health_reports_consumers() {
        let (context, port, cancel) = serve().await;
        context
            .consumers
            .register(ConsumerId::new("ui-1"), "Desktop", Some(42));

        let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["consumers"][0]["id"], "ui-1");
        assert_eq!(body["streams"]["candles"]["key_count"], 0);
        assert_eq!(body["metadata"]["circuit"]["is_open"], false);

        cancel.cancel();
    }

    #[tokio::test]
    async fn liveness_and_readiness() {
        let (context, port, cancel) = serve().await;

        let live = reqwest::get(format!("http://127.0.0.1:{port}/healthz"))
            .await
            .unwrap();
        assert_eq!(live.status(), reqwest::StatusCode::OK);

        let ready = reqwest::get(format!("http://127.0.0.1:{port}/readyz"))
            .await
            .unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);

        context.consumers.check_for_shutdown();
        let draining = reqwest::get(format!("http://127.0.0.1:{port}/readyz"))
            .await
            .unwrap();
        assert_eq!(draining.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        cancel.cancel();
    }

    #[tokio::test]
    async fn server_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let mut config = ServiceConfig::with_data_dir(std::env::temp_dir());
        config.metadata.enabled = false;
        let context = Arc::new(ServiceContext::build(config, || {}).unwrap());
        let server = StatusServer::bind(0, Arc::new(StatusServerState::new(context)), cancel.clone())
            .await
            .unwrap();

        let handle = tokio::spawn(server.run());
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
