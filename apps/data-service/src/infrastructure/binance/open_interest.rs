//! Open interest over the Binance REST API.

use std::sync::Arc;

use async_trait::async_trait;

use super::messages::OpenInterestResponse;
use crate::application::ports::{OpenInterestSample, OpenInterestSource, UpstreamError};
use crate::infrastructure::http::ResilientApiClient;

/// Default futures REST endpoint.
pub const DEFAULT_REST_BASE_URL: &str = "https://fapi.binance.com";

/// [`OpenInterestSource`] backed by `GET /fapi/v1/openInterest`.
#[derive(Debug, Clone)]
pub struct BinanceOpenInterestSource {
    client: Arc<ResilientApiClient>,
}

impl BinanceOpenInterestSource {
    /// Create a source over `client` (based at the futures REST host).
    #[must_use]
    pub const fn new(client: Arc<ResilientApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OpenInterestSource for BinanceOpenInterestSource {
    async fn fetch(&self, symbol: &str) -> Result<OpenInterestSample, UpstreamError> {
        let response: OpenInterestResponse = self
            .client
            .get_json("/fapi/v1/openInterest", &[("symbol", symbol.to_uppercase())])
            .await?;

        Ok(OpenInterestSample {
            open_interest: response.open_interest,
            time: response.time,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::infrastructure::http::ApiClientConfig;

    fn source(server: &MockServer) -> BinanceOpenInterestSource {
        let config = ApiClientConfig::new("binance", server.uri()).with_min_interval(Duration::ZERO);
        BinanceOpenInterestSource::new(Arc::new(ResilientApiClient::new(config).unwrap()))
    }

    #[tokio::test]
    async fn fetch_parses_sample() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/openInterest"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "openInterest": "10659.509",
                "symbol": "BTCUSDT",
                "time": 1_589_437_530_011_i64
            })))
            .mount(&server)
            .await;

        let sample = source(&server).fetch("btcusdt").await.unwrap();
        assert_eq!(sample.open_interest, dec!(10659.509));
        assert_eq!(sample.time.timestamp_millis(), 1_589_437_530_011);
    }

    #[tokio::test]
    async fn rejected_request_maps_to_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad symbol"))
            .mount(&server)
            .await;

        let err = source(&server).fetch("NOPE").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Request(_)));
    }
}
