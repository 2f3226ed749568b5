//! REST client error types.

use thiserror::Error;

use crate::application::ports::UpstreamError;

/// Errors from [`ResilientApiClient`](super::ResilientApiClient).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The circuit breaker is open; no request was sent.
    #[error("circuit open for {client}")]
    CircuitOpen {
        /// Client name.
        client: String,
    },

    /// Rate limited and the 429 retry budget is spent.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested retry delay in seconds.
        retry_after_secs: u64,
    },

    /// Non-retryable HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Max retries exceeded.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Last failure seen.
        last_error: String,
    },

    /// Network error while reading a response.
    #[error("Network error: {0}")]
    Network(String),

    /// Response body did not match the expected type.
    #[error("JSON parsing error: {0}")]
    Decode(String),

    /// Base URL or path could not form a URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Whether the breaker rejected the call without I/O.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl From<ApiError> for UpstreamError {
    fn from(err: ApiError) -> Self {
        Self::Request(err.to_string())
    }
}
