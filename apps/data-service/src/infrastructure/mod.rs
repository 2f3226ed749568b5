//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus process plumbing.

/// Binance futures adapters (WebSocket streams, open interest REST).
pub mod binance;

/// Configuration and dependency injection.
pub mod config;

/// Port discovery file.
pub mod discovery;

/// Status and metrics HTTP endpoint.
pub mod health;

/// Rate-limited REST client with retries and a circuit breaker.
pub mod http;

/// Reference metadata sync.
pub mod metadata;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Service startup and teardown.
pub mod process;

/// Tracing setup.
pub mod telemetry;
