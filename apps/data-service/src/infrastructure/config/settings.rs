//! Service Configuration Settings
//!
//! Configuration types for the data service, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::{
    ConsumerRegistryConfig, LiveStreamConfig, OpenInterestConfig, ReconnectConfig,
};
use crate::infrastructure::binance::{DEFAULT_REST_BASE_URL, DEFAULT_WS_BASE_URL};
use crate::infrastructure::http::{ApiClientConfig, CircuitBreakerConfig, RetryConfig};

/// File name of the discovery file inside the data directory.
pub const DISCOVERY_FILE_NAME: &str = "data-service.port";

/// Status server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Listening port (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 17650 }
    }
}

/// Resource caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSettings {
    /// Runtime worker threads.
    pub max_concurrency: usize,
    /// Soft memory budget reported on the status endpoint.
    pub max_memory_mb: u64,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism().map_or(4, usize::from),
            max_memory_mb: 2048,
        }
    }
}

/// Upstream exchange settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSettings {
    /// WebSocket base URL.
    pub ws_base_url: String,
    /// REST base URL.
    pub rest_base_url: String,
    /// Fixed delay before reconnecting a dropped stream.
    pub reconnect_delay: Duration,
    /// Open interest poll period.
    pub oi_poll_interval: Duration,
    /// Closed bars retained per key.
    pub closed_bar_capacity: usize,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
            oi_poll_interval: Duration::from_secs(15),
            closed_bar_capacity: 10,
        }
    }
}

/// Metadata API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSettings {
    /// Whether the periodic sync runs.
    pub enabled: bool,
    /// API base URL.
    pub base_url: String,
    /// Minimum time between requests.
    pub min_interval: Duration,
    /// Time between syncs.
    pub sync_interval: Duration,
    /// Consecutive failures that open the circuit.
    pub circuit_threshold: u32,
    /// How long an open circuit rejects calls.
    pub circuit_cooldown: Duration,
    /// Attempts per request.
    pub max_attempts: u32,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            min_interval: Duration::from_millis(8500),
            sync_interval: Duration::from_secs(24 * 60 * 60),
            circuit_threshold: 10,
            circuit_cooldown: Duration::from_secs(15 * 60),
            max_attempts: 3,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Directory for the discovery file and cached data.
    pub data_dir: PathBuf,
    /// Discovery file path.
    pub discovery_file: PathBuf,
    /// Status server settings.
    pub server: ServerSettings,
    /// Resource caps.
    pub resources: ResourceSettings,
    /// Consumer liveness timings.
    pub consumers: ConsumerRegistryConfig,
    /// Upstream exchange settings.
    pub exchange: ExchangeSettings,
    /// Metadata API settings.
    pub metadata: MetadataSettings,
}

impl ServiceConfig {
    /// Defaults rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            discovery_file: data_dir.join(DISCOVERY_FILE_NAME),
            data_dir,
            server: ServerSettings::default(),
            resources: ResourceSettings::default(),
            consumers: ConsumerRegistryConfig::default(),
            exchange: ExchangeSettings::default(),
            metadata: MetadataSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Every variable is optional; unparsable values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory is configured and the platform
    /// has none.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = match std::env::var("DATA_SERVICE_DATA_DIR") {
            Ok(dir) if dir.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("DATA_SERVICE_DATA_DIR".to_string()));
            }
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_data_dir()?,
        };

        let mut config = Self::with_data_dir(data_dir);

        if let Ok(path) = std::env::var("DATA_SERVICE_DISCOVERY_FILE")
            && !path.trim().is_empty()
        {
            config.discovery_file = PathBuf::from(path);
        }

        config.server.port = parse_env_u16("DATA_SERVICE_PORT", config.server.port);

        config.resources = ResourceSettings {
            max_concurrency: parse_env_usize(
                "DATA_SERVICE_MAX_CONCURRENCY",
                config.resources.max_concurrency,
            )
            .max(1),
            max_memory_mb: parse_env_u64("DATA_SERVICE_MAX_MEMORY_MB", config.resources.max_memory_mb),
        };

        config.consumers = ConsumerRegistryConfig {
            heartbeat_timeout: parse_env_duration_secs(
                "DATA_SERVICE_HEARTBEAT_TIMEOUT_SECS",
                config.consumers.heartbeat_timeout,
            ),
            sweep_interval: parse_env_duration_secs(
                "DATA_SERVICE_SWEEP_INTERVAL_SECS",
                config.consumers.sweep_interval,
            ),
            idle_grace: parse_env_duration_secs(
                "DATA_SERVICE_IDLE_GRACE_SECS",
                config.consumers.idle_grace,
            ),
        };

        config.exchange = ExchangeSettings {
            ws_base_url: parse_env_string("DATA_SERVICE_WS_BASE_URL", &config.exchange.ws_base_url),
            rest_base_url: parse_env_string(
                "DATA_SERVICE_REST_BASE_URL",
                &config.exchange.rest_base_url,
            ),
            reconnect_delay: parse_env_duration_secs(
                "DATA_SERVICE_RECONNECT_DELAY_SECS",
                config.exchange.reconnect_delay,
            ),
            oi_poll_interval: parse_env_duration_secs(
                "DATA_SERVICE_OI_POLL_INTERVAL_SECS",
                config.exchange.oi_poll_interval,
            ),
            closed_bar_capacity: parse_env_usize(
                "DATA_SERVICE_CLOSED_BAR_CAPACITY",
                config.exchange.closed_bar_capacity,
            ),
        };

        config.metadata = MetadataSettings {
            enabled: parse_env_bool("DATA_SERVICE_METADATA_ENABLED", config.metadata.enabled),
            base_url: parse_env_string("DATA_SERVICE_METADATA_BASE_URL", &config.metadata.base_url),
            min_interval: parse_env_duration_millis(
                "DATA_SERVICE_METADATA_MIN_INTERVAL_MS",
                config.metadata.min_interval,
            ),
            sync_interval: parse_env_duration_secs(
                "DATA_SERVICE_METADATA_SYNC_INTERVAL_SECS",
                config.metadata.sync_interval,
            ),
            circuit_threshold: parse_env_u32(
                "DATA_SERVICE_CIRCUIT_THRESHOLD",
                config.metadata.circuit_threshold,
            ),
            circuit_cooldown: parse_env_duration_secs(
                "DATA_SERVICE_CIRCUIT_COOLDOWN_SECS",
                config.metadata.circuit_cooldown,
            ),
            max_attempts: parse_env_u32("DATA_SERVICE_MAX_ATTEMPTS", config.metadata.max_attempts)
                .max(1),
        };

        Ok(config)
    }

    /// Settings for the push stream managers.
    #[must_use]
    pub const fn live_stream(&self) -> LiveStreamConfig {
        LiveStreamConfig {
            reconnect: ReconnectConfig::fixed(self.exchange.reconnect_delay),
            closed_capacity: self.exchange.closed_bar_capacity,
        }
    }

    /// Settings for open interest polling.
    #[must_use]
    pub const fn open_interest(&self) -> OpenInterestConfig {
        OpenInterestConfig {
            poll_interval: self.exchange.oi_poll_interval,
        }
    }

    /// REST client settings for the metadata API.
    #[must_use]
    pub fn metadata_client(&self) -> ApiClientConfig {
        ApiClientConfig {
            retry: RetryConfig {
                max_attempts: self.metadata.max_attempts,
                ..RetryConfig::default()
            },
            circuit: CircuitBreakerConfig {
                failure_threshold: self.metadata.circuit_threshold,
                cooldown: self.metadata.circuit_cooldown,
            },
            ..ApiClientConfig::new("metadata", self.metadata.base_url.clone())
                .with_min_interval(self.metadata.min_interval)
        }
    }

    /// REST client settings for the exchange.
    #[must_use]
    pub fn exchange_client(&self) -> ApiClientConfig {
        ApiClientConfig::new("binance", self.exchange.rest_base_url.clone())
            .with_min_interval(Duration::from_millis(100))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No data directory could be determined.
    #[error("no data directory: set DATA_SERVICE_DATA_DIR")]
    NoDataDir,
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("dev", "cream", "data-service")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}

pub(crate) fn parse_env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
