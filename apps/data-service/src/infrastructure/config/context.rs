//! Service Context
//!
//! Owns every long-lived component and wires them together. Handed around
//! as `Arc<ServiceContext>`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::settings::ServiceConfig;
use crate::application::ports::{OpenInterestSource, UpstreamConnector};
use crate::application::services::{ConsumerRegistry, OpenInterestManager};
use crate::domain::consumer::ConsumerSnapshot;
use crate::domain::coverage::CoverageRegistry;
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::binance::{
    AggTradeDecoder, AggTradeStreamManager, BinanceOpenInterestSource, CandleStreamManager,
    KlineDecoder, MarkPriceDecoder, MarkPriceStreamManager, WsConnector,
};
use crate::infrastructure::http::{ApiError, CircuitBreakerState, ResilientApiClient};
use crate::infrastructure::metadata::{MetadataCatalog, MetadataSync, MetadataSyncConfig};

/// Long-lived service components.
#[derive(Debug)]
pub struct ServiceContext {
    /// Configuration the context was built from.
    pub config: ServiceConfig,
    /// Cached time ranges per symbol and data kind.
    pub coverage: Arc<CoverageRegistry>,
    /// Connected clients.
    pub consumers: ConsumerRegistry,
    /// Candle streams.
    pub candles: CandleStreamManager,
    /// Aggregated trade streams.
    pub agg_trades: AggTradeStreamManager,
    /// Mark price streams.
    pub mark_price: MarkPriceStreamManager,
    /// Open interest polling.
    pub open_interest: OpenInterestManager,
    /// Metadata API client.
    pub metadata_client: Arc<ResilientApiClient>,
    /// Synced reference metadata.
    pub metadata: Arc<MetadataCatalog>,
}

impl ServiceContext {
    /// Build a context over the Binance adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if a REST client cannot be built.
    pub fn build(
        config: ServiceConfig,
        on_idle: impl FnOnce() + Send + 'static,
    ) -> Result<Self, ApiError> {
        let connector = Arc::new(WsConnector::new(&config.exchange.ws_base_url));
        let exchange_client = Arc::new(ResilientApiClient::new(config.exchange_client())?);
        let oi_source = Arc::new(BinanceOpenInterestSource::new(exchange_client));
        Self::with_upstreams(config, connector, oi_source, on_idle)
    }

    /// Build a context over the given upstreams.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata client cannot be built.
    pub fn with_upstreams(
        config: ServiceConfig,
        connector: Arc<dyn UpstreamConnector>,
        oi_source: Arc<dyn OpenInterestSource>,
        on_idle: impl FnOnce() + Send + 'static,
    ) -> Result<Self, ApiError> {
        let live = config.live_stream();

        Ok(Self {
            coverage: Arc::new(CoverageRegistry::new()),
            consumers: ConsumerRegistry::new(config.consumers, on_idle),
            candles: CandleStreamManager::new(KlineDecoder, Arc::clone(&connector), live.clone()),
            agg_trades: AggTradeStreamManager::new(
                AggTradeDecoder,
                Arc::clone(&connector),
                live.clone(),
            ),
            mark_price: MarkPriceStreamManager::new(MarkPriceDecoder, connector, live),
            open_interest: OpenInterestManager::new(oi_source, config.open_interest()),
            metadata_client: Arc::new(ResilientApiClient::new(config.metadata_client())?),
            metadata: Arc::new(MetadataCatalog::new()),
            config,
        })
    }

    /// Start background work: the consumer sweep and, if enabled, metadata sync.
    ///
    /// Returns the metadata sync task, if any.
    pub fn start(&self, cancel: &CancellationToken) -> Option<JoinHandle<()>> {
        self.consumers.start();

        if !self.config.metadata.enabled {
            tracing::info!("Metadata sync disabled");
            return None;
        }
        let sync = MetadataSync::new(
            Arc::clone(&self.metadata_client),
            Arc::clone(&self.metadata),
            MetadataSyncConfig {
                interval: self.config.metadata.sync_interval,
                ..MetadataSyncConfig::default()
            },
        );
        Some(sync.spawn_periodic(cancel.child_token()))
    }

    /// Stop timers and close every upstream.
    pub async fn shutdown(&self) {
        self.consumers.shutdown();
        tokio::join!(
            self.candles.shutdown(),
            self.agg_trades.shutdown(),
            self.mark_price.shutdown(),
            self.open_interest.shutdown(),
        );
    }

    /// Status snapshot for the health endpoint.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            consumers: self.consumers.consumers(),
            shutdown_pending: self.consumers.is_shutdown_pending(),
            streams: StreamStatus {
                candles: self.candles.stats(),
                agg_trades: self.agg_trades.stats(),
                mark_price: self.mark_price.stats(),
                open_interest: self.open_interest.stats(),
            },
            coverage_keys: self.coverage.keys().len(),
            metadata: MetadataStatus {
                entries: self.metadata.len(),
                last_synced: self.metadata.last_synced(),
                circuit: self.metadata_client.circuit_state(),
            },
            max_memory_mb: self.config.resources.max_memory_mb,
        }
    }
}

/// `/health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Always "ok" while serving.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Registered consumers.
    pub consumers: Vec<ConsumerSnapshot>,
    /// Whether the idle timer is armed.
    pub shutdown_pending: bool,
    /// Live subscription counts.
    pub streams: StreamStatus,
    /// Keys with tracked coverage.
    pub coverage_keys: usize,
    /// Metadata sync state.
    pub metadata: MetadataStatus,
    /// Configured memory budget.
    pub max_memory_mb: u64,
}

/// Subscription counts per stream family.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Candles.
    pub candles: SubscriptionStats,
    /// Aggregated trades.
    pub agg_trades: SubscriptionStats,
    /// Mark price.
    pub mark_price: SubscriptionStats,
    /// Open interest.
    pub open_interest: SubscriptionStats,
}

/// Metadata catalog and client state.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataStatus {
    /// Symbols held.
    pub entries: usize,
    /// Last successful sync.
    pub last_synced: Option<DateTime<Utc>>,
    /// Metadata client breaker.
    pub circuit: CircuitBreakerState,
}
