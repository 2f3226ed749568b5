#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Data Service - Shared Market Data Daemon
//!
//! A background process shared by any number of desktop clients. It tracks
//! which time ranges of historical data are cached, holds a single upstream
//! connection per live stream no matter how many listeners it has, and exits
//! on its own once the last client is gone.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Value types and pure rules
//!   - `coverage`: Cached time ranges and gap detection
//!   - `preload`: Prioritized fetch work items
//!   - `consumer`: Client identity and liveness
//!   - `streaming`: Candles, trades, mark price, open interest
//!   - `subscription`: Stream keys and listener identity
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream connector, frame decoder, open interest source
//!   - `services`: Consumer registry, live stream managers
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Futures WebSocket streams and open interest REST
//!   - `http`: Resilient REST client (rate limit, retry, circuit breaker)
//!   - `metadata`: Reference metadata sync
//!   - `config`: Configuration and dependency injection
//!   - `health`: Status and metrics endpoint
//!   - `discovery`: Port discovery file
//!   - `process`: Startup and teardown
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► LiveStreamManager ──► listener 1
//!  (one per key)    (current, closed) ─► listener 2
//!                                     └► listener N
//!
//! Client ──register/heartbeat──► ConsumerRegistry ──idle──► ServiceProcess exits
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::consumer::{ConsumerId, ConsumerInfo, ConsumerSnapshot};
pub use domain::coverage::{CoverageKey, CoverageRegistry, CoverageTracker, TimeRange, TimeRangeError};
pub use domain::preload::{PreloadPriority, PreloadRequest, QueuedPreload};
pub use domain::streaming::{
    AggTrade, Candle, DataKind, MarkPrice, OpenInterestUpdate, StreamEvent, Timeframe,
};
pub use domain::subscription::{ListenerId, SubscriptionKey, SubscriptionStats};

// Application services
pub use application::services::{
    ConsumerRegistry, ConsumerRegistryConfig, LiveStreamConfig, LiveStreamError,
    LiveStreamManager, OpenInterestConfig, OpenInterestManager, ReconnectConfig, Subscription,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig, ServiceContext, ServiceStatus};

// Process lifecycle
pub use infrastructure::process::{ServiceError, ServiceProcess};

// REST client
pub use infrastructure::http::{ApiClientConfig, ApiError, ResilientApiClient};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
