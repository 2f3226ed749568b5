//! Reference Metadata Sync
//!
//! Periodically pulls coin metadata (market cap, supply, rank) from a
//! CoinGecko-style `GET /coins/markets` endpoint through the shared
//! [`ResilientApiClient`] and keeps it in an in-memory catalog keyed by
//! upper-case ticker symbol.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::http::{ApiError, ResilientApiClient};
use crate::infrastructure::metrics;

// =============================================================================
// Types
// =============================================================================

/// One row of `/coins/markets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMetadata {
    /// Provider coin id, e.g. "bitcoin".
    pub id: String,
    /// Ticker symbol as published (usually lower-case).
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Market capitalization in the quote currency.
    #[serde(default)]
    pub market_cap: Option<f64>,
    /// Rank by market capitalization.
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    /// Circulating supply.
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    /// Total supply.
    #[serde(default)]
    pub total_supply: Option<f64>,
    /// Logo URL.
    #[serde(default)]
    pub image: Option<String>,
}

/// Sync settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSyncConfig {
    /// Endpoint path.
    pub path: String,
    /// Quote currency.
    pub vs_currency: String,
    /// Rows per page.
    pub page_size: usize,
    /// Pages fetched per sync.
    pub max_pages: u32,
    /// Time between syncs.
    pub interval: Duration,
}

impl Default for MetadataSyncConfig {
    fn default() -> Self {
        Self {
            path: "/coins/markets".to_string(),
            vs_currency: "usd".to_string(),
            page_size: 250,
            max_pages: 4,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Default)]
struct CatalogState {
    entries: HashMap<String, CoinMetadata>,
    last_synced: Option<DateTime<Utc>>,
}

/// In-memory metadata keyed by upper-case symbol.
#[derive(Debug, Default)]
pub struct MetadataCatalog {
    state: RwLock<CatalogState>,
}

impl MetadataCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog contents.
    ///
    /// When several coins share a symbol the first (highest ranked) wins.
    pub fn replace(&self, rows: Vec<CoinMetadata>) -> usize {
        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            entries.entry(row.symbol.to_uppercase()).or_insert(row);
        }
        let count = entries.len();

        let mut state = self.state.write();
        state.entries = entries;
        state.last_synced = Some(Utc::now());
        drop(state);

        metrics::set_metadata_entries(count);
        count
    }

    /// Metadata for a base-asset symbol (case-insensitive).
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<CoinMetadata> {
        self.state.read().entries.get(&symbol.to_uppercase()).cloned()
    }

    /// Number of symbols held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Time of the last successful sync.
    #[must_use]
    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_synced
    }
}

// =============================================================================
// Sync
// =============================================================================

/// Fetches metadata into a [`MetadataCatalog`].
#[derive(Debug, Clone)]
pub struct MetadataSync {
    client: Arc<ResilientApiClient>,
    catalog: Arc<MetadataCatalog>,
    config: MetadataSyncConfig,
}

impl MetadataSync {
    /// Create a sync over `client`.
    #[must_use]
    pub const fn new(
        client: Arc<ResilientApiClient>,
        catalog: Arc<MetadataCatalog>,
        config: MetadataSyncConfig,
    ) -> Self {
        Self {
            client,
            catalog,
            config,
        }
    }

    /// Catalog being filled.
    #[must_use]
    pub fn catalog(&self) -> &Arc<MetadataCatalog> {
        &self.catalog
    }

    /// Run one sync. Returns the number of symbols stored.
    ///
    /// # Errors
    ///
    /// Returns the client error; the catalog keeps its previous contents.
    pub async fn sync_once(&self) -> Result<usize, ApiError> {
        let query = [
            ("vs_currency", self.config.vs_currency.clone()),
            ("order", "market_cap_desc".to_string()),
        ];
        let rows: Vec<CoinMetadata> = self
            .client
            .get_pages(
                &self.config.path,
                &query,
                self.config.page_size,
                Some(self.config.max_pages),
            )
            .await?;

        let count = self.catalog.replace(rows);
        tracing::info!(client = %self.client.name(), symbols = count, "Metadata synced");
        Ok(count)
    }

    /// Sync now and then every `interval` until `cancel` fires.
    #[must_use]
    pub fn spawn_periodic(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    () = cancel.cancelled() => break,
                    result = self.sync_once() => result,
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Metadata sync failed");
                }
            }

            tracing::info!("Metadata sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::infrastructure::http::ApiClientConfig;

    fn row(id: &str, symbol: &str, rank: u32) -> serde_json::Value {
        json!({
            "id": id,
            "symbol": symbol,
            "name": id,
            "market_cap": 1.0e9,
            "market_cap_rank": rank,
            "circulating_supply": null
        })
    }

    fn sync(server: &MockServer, page_size: usize) -> MetadataSync {
        let client = ApiClientConfig::new("metadata", server.uri()).with_min_interval(Duration::ZERO);
        MetadataSync::new(
            Arc::new(ResilientApiClient::new(client).unwrap()),
            Arc::new(MetadataCatalog::new()),
            MetadataSyncConfig {
                page_size,
                ..MetadataSyncConfig::default()
            },
        )
    }

    #[test]
    fn catalog_keeps_first_row_per_symbol() {
        let catalog = MetadataCatalog::new();
        let rows: Vec<CoinMetadata> = serde_json::from_value(json!([
            row("bitcoin", "btc", 1),
            row("wrapped-btc-clone", "btc", 900),
            row("ethereum", "eth", 2),
        ]))
        .unwrap();

        assert_eq!(catalog.replace(rows), 2);
        assert_eq!(catalog.get("BTC").unwrap().id, "bitcoin");
        assert_eq!(catalog.get("eth").unwrap().market_cap_rank, Some(2));
        assert!(catalog.last_synced().is_some());
    }

    #[tokio::test]
    async fn sync_once_pages_through_markets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "1"))
            .and(query_param("vs_currency", "usd"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([row("bitcoin", "btc", 1), row("ethereum", "eth", 2)])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("solana", "sol", 3)])))
            .mount(&server)
            .await;

        let sync = sync(&server, 2);
        assert_eq!(sync.sync_once().await.unwrap(), 3);
        assert_eq!(sync.catalog().get("SOL").unwrap().name, "solana");
    }

    #[tokio::test]
    async fn failed_sync_keeps_previous_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let sync = sync(&server, 2);
        sync.catalog().replace(vec![serde_json::from_value(row("bitcoin", "btc", 1)).unwrap()]);

        assert!(matches!(
            sync.sync_once().await,
            Err(ApiError::Status { status: 401, .. })
        ));
        assert_eq!(sync.catalog().len(), 1);
    }

    #[tokio::test]
    async fn periodic_sync_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("bitcoin", "btc", 1)])))
            .mount(&server)
            .await;

        let sync = sync(&server, 250);
        let catalog = Arc::clone(sync.catalog());
        let cancel = CancellationToken::new();
        let handle = sync.spawn_periodic(cancel.clone());

        for _ in 0..100 {
            if !catalog.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(catalog.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
