//! Data Service Binary
//!
//! Starts the shared market data daemon.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin data-service
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//!
//! - `DATA_SERVICE_DATA_DIR`: Data directory (default: platform data dir)
//! - `DATA_SERVICE_PORT`: Status server port, 0 for any (default: 17650)
//! - `DATA_SERVICE_MAX_CONCURRENCY`: Runtime worker threads (default: CPU count)
//! - `DATA_SERVICE_MAX_MEMORY_MB`: Memory budget reported on `/health` (default: 2048)
//! - `DATA_SERVICE_HEARTBEAT_TIMEOUT_SECS`: Consumer heartbeat timeout (default: 30)
//! - `DATA_SERVICE_IDLE_GRACE_SECS`: Delay before idle shutdown (default: 10)
//! - `DATA_SERVICE_METADATA_ENABLED`: Enable metadata sync (default: true)
//! - `DATA_SERVICE_LOG_LEVEL`: Log level for this crate (default: info)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Extra filter directives
//!
//! See `ServiceConfig::from_env` for the full list.

use std::process::ExitCode;
use std::time::Duration;

use data_service::infrastructure::telemetry;
use data_service::{ServiceConfig, ServiceProcess, init_metrics};
use tokio::signal;

/// Upper bound on teardown after a stop signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();
    let _metrics_handle = init_metrics();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    log_config(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.resources.max_concurrency)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: ServiceConfig) -> ExitCode {
    tracing::info!("Starting data service");

    let process = match ServiceProcess::start(config).await {
        Ok(process) => process,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start data service");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        () = process.wait() => {}
        () = await_signal() => {
            tracing::info!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Graceful shutdown started"
            );
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, process.shutdown()).await.is_err() {
                tracing::warn!("Shutdown timed out");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        data_dir = %config.data_dir.display(),
        port = config.server.port,
        max_concurrency = config.resources.max_concurrency,
        max_memory_mb = config.resources.max_memory_mb,
        metadata_sync = config.metadata.enabled,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_base_url = %config.exchange.ws_base_url,
        rest_base_url = %config.exchange.rest_base_url,
        metadata_base_url = %config.metadata.base_url,
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
///
/// If a handler cannot be installed, that signal is never observed.
async fn await_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
