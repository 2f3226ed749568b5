//! Resilient REST client.
//!
//! Every call passes through, in order:
//!
//! 1. the circuit breaker (open circuit fails fast, no I/O),
//! 2. the shared rate limiter,
//! 3. the request itself, categorized by status.
//!
//! I/O errors and retryable statuses back off exponentially within a bounded
//! attempt budget. 429 responses honor `Retry-After` and draw from their own
//! budget. Every failed attempt counts toward the breaker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
use super::error::ApiError;
use super::rate_limiter::RateLimiter;
use crate::infrastructure::metrics::{self, ApiOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Retry configuration for I/O errors and retryable statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per call.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for any delay.
    pub max_backoff: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiClientConfig {
    /// Name used in logs and metrics.
    pub name: String,
    /// Base URL, joined with request paths.
    pub base_url: String,
    /// Minimum time between requests.
    pub min_interval: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Backoff schedule.
    pub retry: RetryConfig,
    /// 429 retries allowed per call.
    pub max_rate_limit_retries: u32,
    /// Wait used when a 429 carries no `Retry-After`.
    pub default_retry_after: Duration,
    /// Breaker thresholds.
    pub circuit: CircuitBreakerConfig,
}

impl ApiClientConfig {
    /// Defaults for a third-party API: 8.5s spacing, 30s timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            min_interval: Duration::from_millis(8500),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            max_rate_limit_retries: 5,
            default_retry_after: Duration::from_secs(60),
            circuit: CircuitBreakerConfig::default(),
        }
    }

    /// Set the minimum request spacing.
    #[must_use]
    pub const fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }
}

// =============================================================================
// Client
// =============================================================================

/// REST client with rate limiting, retry and a circuit breaker.
#[derive(Debug)]
pub struct ResilientApiClient {
    http: Client,
    config: ApiClientConfig,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl ResilientApiClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the HTTP client cannot be built, or `InvalidUrl`
    /// for an unparsable base URL.
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiError> {
        Url::parse(&config.base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("data-service/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            limiter: RateLimiter::new(config.min_interval),
            breaker: CircuitBreaker::new(config.name.clone(), config.circuit),
            config,
        })
    }

    /// Client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// GET `path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns `CircuitOpen` without I/O while the breaker is open, `Status`
    /// for non-retryable statuses, `RateLimited` or `MaxRetriesExceeded` when
    /// a retry budget runs out, and `Decode` for unexpected bodies.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let body = self.execute(path, query).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// GET successive `page`/`per_page` pages until a short page.
    ///
    /// # Errors
    ///
    /// Fails on the first page that fails; see [`Self::get_json`].
    pub async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        page_size: usize,
    ) -> Result<Vec<T>, ApiError> {
        self.get_pages(path, query, page_size, None).await
    }

    /// Like [`Self::get_paginated`], stopping after `max_pages` if given.
    ///
    /// # Errors
    ///
    /// Fails on the first page that fails; see [`Self::get_json`].
    pub async fn get_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        page_size: usize,
        max_pages: Option<u32>,
    ) -> Result<Vec<T>, ApiError> {
        let page_size = page_size.max(1);
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut page_query = query.to_vec();
            page_query.push(("page", page.to_string()));
            page_query.push(("per_page", page_size.to_string()));

            let batch: Vec<T> = self.get_json(path, &page_query).await?;
            let len = batch.len();
            items.extend(batch);

            tracing::debug!(client = %self.config.name, page, len, "Fetched page");

            if len < page_size || max_pages.is_some_and(|max| page >= max) {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    /// Whether calls are currently rejected.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.consecutive_failures()
    }

    /// Close the circuit.
    pub fn reset_circuit(&self) {
        self.breaker.reset();
    }

    /// Breaker snapshot for status reporting.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.snapshot()
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let joined = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    /// Internal request implementation with retry logic.
    async fn execute(&self, path: &str, query: &[(&str, String)]) -> Result<String, ApiError> {
        let name = self.config.name.as_str();
        let url = self.url(path)?;
        let mut backoff = ExponentialBackoff::new(&self.config.retry);
        let mut rate_limit_retries = 0;

        loop {
            if !self.breaker.is_call_permitted() {
                metrics::record_api_request(name, ApiOutcome::CircuitOpen, None);
                return Err(ApiError::CircuitOpen {
                    client: name.to_string(),
                });
            }

            self.limiter.acquire().await;
            let started = Instant::now();

            let response = match self.http.get(url.clone()).query(query).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    self.breaker.record_failure();
                    metrics::record_api_request(name, ApiOutcome::Retryable, Some(started.elapsed()));
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            client = %name,
                            error = %e,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ApiError::MaxRetriesExceeded {
                        attempts: backoff.attempt,
                        last_error: e.to_string(),
                    });
                }
            };

            let status = response.status();

            if status.is_success() {
                let text = match response.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        self.breaker.record_failure();
                        return Err(ApiError::Network(e.to_string()));
                    }
                };
                self.breaker.record_success();
                metrics::record_api_request(name, ApiOutcome::Success, Some(started.elapsed()));
                return Ok(text);
            }

            self.breaker.record_failure();

            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));

            let error_body = response.text().await.unwrap_or_default();

            match categorize_status(status) {
                ErrorCategory::RateLimited => {
                    metrics::record_api_request(name, ApiOutcome::RateLimited, Some(started.elapsed()));
                    let delay = retry_after.unwrap_or(self.config.default_retry_after);
                    rate_limit_retries += 1;
                    if rate_limit_retries > self.config.max_rate_limit_retries {
                        return Err(ApiError::RateLimited {
                            retry_after_secs: delay.as_secs(),
                        });
                    }
                    tracing::warn!(
                        client = %name,
                        delay_ms = delay.as_millis(),
                        retry = rate_limit_retries,
                        "Rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                ErrorCategory::Retryable => {
                    metrics::record_api_request(name, ApiOutcome::Retryable, Some(started.elapsed()));
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            client = %name,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Retryable error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ApiError::MaxRetriesExceeded {
                        attempts: backoff.attempt,
                        last_error: format!("HTTP {}: {error_body}", status.as_u16()),
                    });
                }
                ErrorCategory::NonRetryable => {
                    metrics::record_api_request(name, ApiOutcome::Rejected, Some(started.elapsed()));
                    tracing::warn!(client = %name, status = status.as_u16(), "Request rejected");
                    return Err(ApiError::Status {
                        status: status.as_u16(),
                        body: error_body,
                    });
                }
            }
        }
    }
}

/// Parse a `Retry-After` value given as delta-seconds or an HTTP-date.
///
/// A date in the past means retry immediately.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Error category for determining retry behavior.
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Exponential backoff calculator.
struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    const fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * self.multiplier)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(backoff)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct Coin {
        id: String,
    }

    fn config(server: &MockServer) -> ApiClientConfig {
        ApiClientConfig {
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                multiplier: 2.0,
            },
            default_retry_after: Duration::from_millis(1),
            ..ApiClientConfig::new("test", server.uri()).with_min_interval(Duration::ZERO)
        }
    }

    async fn requests(server: &MockServer) -> usize {
        server.received_requests().await.map_or(0, |r| r.len())
    }

    #[test]
    fn categorize_statuses() {
        assert!(matches!(
            categorize_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorCategory::RateLimited
        ));
        assert!(matches!(
            categorize_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorCategory::Retryable
        ));
        assert!(matches!(
            categorize_status(StatusCode::REQUEST_TIMEOUT),
            ErrorCategory::Retryable
        ));
        assert!(matches!(
            categorize_status(StatusCode::NOT_FOUND),
            ErrorCategory::NonRetryable
        ));
    }

    #[test]
    fn backoff_doubles_within_attempt_budget() {
        let mut backoff = ExponentialBackoff::new(&RetryConfig::default());
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.attempt, 3);
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = ResilientApiClient::new(ApiClientConfig::new("bad", "not a url")).unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn get_json_decodes_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "bitcoin"})))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(config(&server)).unwrap();
        let coin: Coin = client.get_json("/coins/bitcoin", &[]).await.unwrap();

        assert_eq!(coin.id, "bitcoin");
        assert_eq!(client.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "eth"})))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(config(&server)).unwrap();
        let coin: Coin = client.get_json("/x", &[]).await.unwrap();

        assert_eq!(coin.id, "eth");
        assert_eq!(requests(&server).await, 3);
        assert_eq!(client.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn server_errors_exhaust_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(config(&server)).unwrap();
        let err = client.get_json::<Coin>("/x", &[]).await.unwrap_err();

        assert!(matches!(err, ApiError::MaxRetriesExceeded { attempts: 3, .. }));
        assert_eq!(requests(&server).await, 3);
        assert_eq!(client.consecutive_failures(), 3);
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(config(&server)).unwrap();
        let err = client.get_json::<Coin>("/x", &[]).await.unwrap_err();

        assert_eq!(
            err,
            ApiError::Status {
                status: 404,
                body: "missing".into()
            }
        );
        assert_eq!(requests(&server).await, 1);
        assert_eq!(client.consecutive_failures(), 1);
    }

    #[test]
    fn retry_after_accepts_seconds_and_http_dates() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2026 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_retry_after(" 120 ", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2026 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2026 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[tokio::test]
    async fn rate_limits_honor_retry_after_within_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(ApiClientConfig {
            max_rate_limit_retries: 2,
            ..config(&server)
        })
        .unwrap();
        let err = client.get_json::<Coin>("/x", &[]).await.unwrap_err();

        assert_eq!(err, ApiError::RateLimited { retry_after_secs: 0 });
        assert_eq!(requests(&server).await, 3);
    }

    #[tokio::test]
    async fn circuit_opens_and_fails_fast_until_reset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(ApiClientConfig {
            circuit: CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(900),
            },
            ..config(&server)
        })
        .unwrap();

        for _ in 0..2 {
            assert!(matches!(
                client.get_json::<Coin>("/x", &[]).await,
                Err(ApiError::Status { status: 400, .. })
            ));
        }
        assert!(client.is_circuit_open());

        let err = client.get_json::<Coin>("/x", &[]).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(requests(&server).await, 2);

        client.reset_circuit();
        assert!(!client.is_circuit_open());
        assert!(matches!(
            client.get_json::<Coin>("/x", &[]).await,
            Err(ApiError::Status { status: 400, .. })
        ));
        assert_eq!(requests(&server).await, 3);
    }

    #[tokio::test]
    async fn pagination_stops_at_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .and(query_param("vs_currency", "usd"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "a"}, {"id": "b"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "c"}])))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(config(&server)).unwrap();
        let coins: Vec<Coin> = client
            .get_paginated("/coins/markets", &[("vs_currency", "usd".to_string())], 2)
            .await
            .unwrap();

        let ids: Vec<_> = coins.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(requests(&server).await, 2);
    }

    #[tokio::test]
    async fn pagination_respects_page_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a"}])))
            .mount(&server)
            .await;

        let client = ResilientApiClient::new(config(&server)).unwrap();
        let coins: Vec<Coin> = client.get_pages("/coins", &[], 1, Some(3)).await.unwrap();

        assert_eq!(coins.len(), 3);
        assert_eq!(requests(&server).await, 3);
    }
}
