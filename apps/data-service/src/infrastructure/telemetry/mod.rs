//! Tracing Setup
//!
//! Console logging through `tracing-subscriber`, with an optional OTLP
//! exporter for distributed tracing.
//!
//! # Environment Variables
//!
//! - `DATA_SERVICE_LOG_LEVEL`: Level for this crate's spans and events (default: info)
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name on exported spans (default: data-service)
//! - `RUST_LOG`: Extra filter directives
//!
//! # Usage
//!
//! ```ignore
//! use data_service::infrastructure::telemetry;
//!
//! // Keep the guard alive for the life of the process
//! let _guard = telemetry::init();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::infrastructure::config::{parse_env_bool, parse_env_string};

/// Dependencies that are noisy at `info`.
const QUIET_TARGETS: [&str; 3] = ["tungstenite=warn", "hyper=warn", "reqwest=warn"];

/// Flushes exported spans when dropped.
pub struct TelemetryGuard {
    exporter: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.exporter.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.exporter.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to flush span exporter: {e}");
        }
    }
}

/// Logging and span export settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Level for `data_service` targets.
    pub log_level: String,
    /// Export spans over OTLP.
    pub export_spans: bool,
    /// OTLP collector endpoint.
    pub collector_endpoint: String,
    /// Service name attached to exported spans.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            export_spans: false,
            collector_endpoint: "http://localhost:4318".to_string(),
            service_name: "data-service".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: parse_env_string("DATA_SERVICE_LOG_LEVEL", &defaults.log_level),
            export_spans: parse_env_bool("OTEL_ENABLED", defaults.export_spans),
            collector_endpoint: parse_env_string(
                "OTEL_EXPORTER_OTLP_ENDPOINT",
                &defaults.collector_endpoint,
            ),
            service_name: parse_env_string("OTEL_SERVICE_NAME", &defaults.service_name),
        }
    }

    /// Filter directives layered over `RUST_LOG`.
    ///
    /// An unparsable level falls back to `info`.
    fn directives(&self) -> Vec<Directive> {
        let own: Result<Directive, _> = format!("data_service={}", self.log_level.trim().to_lowercase())
            .parse()
            .or_else(|_| "data_service=info".parse());

        own.into_iter()
            .chain(QUIET_TARGETS.iter().filter_map(|d| d.parse().ok()))
            .collect()
    }
}

/// Initialize telemetry from the environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install the global subscriber.
///
/// If the OTLP exporter cannot be built, reports it on stderr and continues
/// with console output only.
#[must_use]
pub fn init_with_config(config: &TelemetryConfig) -> TelemetryGuard {
    let filter = config
        .directives()
        .into_iter()
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);

    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = config
        .export_spans
        .then(|| span_exporter(config))
        .and_then(|built| {
            built
                .inspect_err(|e| eprintln!("OTLP exporter unavailable, logging to console only: {e}"))
                .ok()
        });

    let spans = exporter.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(spans)
        .init();

    TelemetryGuard { exporter }
}

fn span_exporter(
    config: &TelemetryConfig,
) -> Result<SdkTracerProvider, opentelemetry_otlp::ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.collector_endpoint)
        .build()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
