//! Service Process Lifecycle
//!
//! Brings the daemon up and tears it down:
//!
//! 1. create the data directory
//! 2. build the [`ServiceContext`] with an idle callback that ends the process
//! 3. bind the status server and publish its port in the discovery file
//! 4. serve until idle shutdown or an external stop request
//! 5. stop the server, close upstreams and delete the discovery file
//!
//! Teardown runs once however many times [`ServiceProcess::shutdown`] or
//! [`ServiceProcess::wait`] is called. A caller arriving mid-teardown waits
//! for it to finish, and a teardown whose caller was dropped partway is
//! resumed by the next caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::{ServiceConfig, ServiceContext};
use crate::infrastructure::discovery::{DiscoveryError, DiscoveryFile};
use crate::infrastructure::health::{StatusServer, StatusServerError, StatusServerState};
use crate::infrastructure::http::ApiError;

/// Upper bound on waiting for the status server to drain.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Data directory could not be created.
    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        /// Directory involved.
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Context wiring failed.
    #[error("failed to build service context: {0}")]
    Context(#[from] ApiError),

    /// Status server could not bind.
    #[error(transparent)]
    Server(#[from] StatusServerError),

    /// Discovery file could not be written.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// A running service instance.
#[derive(Debug)]
pub struct ServiceProcess {
    context: Arc<ServiceContext>,
    discovery: DiscoveryFile,
    port: u16,
    shutdown: CancellationToken,
    server_cancel: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
    metadata_sync: parking_lot::Mutex<Option<JoinHandle<()>>>,
    torn_down: OnceCell<()>,
}

impl ServiceProcess {
    /// Start the service on the Binance adapters.
    ///
    /// # Errors
    ///
    /// See [`ServiceError`]. Nothing is left running on failure.
    pub async fn start(config: ServiceConfig) -> Result<Self, ServiceError> {
        let shutdown = CancellationToken::new();
        let on_idle = idle_callback(shutdown.clone());
        let context = prepare(&config)
            .and_then(|()| ServiceContext::build(config, on_idle).map_err(ServiceError::from))?;
        Self::launch(context, shutdown).await
    }

    /// Start the service over a prebuilt context.
    ///
    /// `shutdown` must be the token the context's idle callback cancels.
    ///
    /// # Errors
    ///
    /// See [`ServiceError`].
    pub async fn start_with_context(
        context: ServiceContext,
        shutdown: CancellationToken,
    ) -> Result<Self, ServiceError> {
        prepare(&context.config)?;
        Self::launch(context, shutdown).await
    }

    async fn launch(context: ServiceContext, shutdown: CancellationToken) -> Result<Self, ServiceError> {
        let context = Arc::new(context);
        let metadata_sync = context.start(&shutdown);

        let server_cancel = CancellationToken::new();
        let bound = StatusServer::bind(
            context.config.server.port,
            Arc::new(StatusServerState::new(Arc::clone(&context))),
            server_cancel.clone(),
        )
        .await;
        let server = match bound {
            Ok(server) => server,
            Err(e) => {
                abort_startup(&context, metadata_sync, &shutdown).await;
                return Err(e.into());
            }
        };
        let port = server.port();

        let discovery = DiscoveryFile::new(&context.config.discovery_file);
        if let Err(e) = discovery.write(port) {
            abort_startup(&context, metadata_sync, &shutdown).await;
            return Err(e.into());
        }

        let server = tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Status server error");
            }
        });

        tracing::info!(
            port,
            data_dir = %context.config.data_dir.display(),
            "Data service ready"
        );

        Ok(Self {
            context,
            discovery,
            port,
            shutdown,
            server_cancel,
            server: Mutex::new(Some(server)),
            metadata_sync: parking_lot::Mutex::new(metadata_sync),
            torn_down: OnceCell::new(),
        })
    }

    /// Port the status server is bound to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Shared service components.
    #[must_use]
    pub const fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    /// Token cancelled when the service should stop.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for idle shutdown or [`ServiceProcess::shutdown`], then tear down.
    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
        self.teardown().await;
    }

    /// Request shutdown and tear down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.teardown().await;
    }

    async fn teardown(&self) {
        self.torn_down.get_or_init(|| self.run_teardown()).await;
    }

    /// Every step tolerates having already run.
    async fn run_teardown(&self) {
        tracing::info!("Data service shutting down");

        self.server_cancel.cancel();
        {
            let mut server = self.server.lock().await;
            if let Some(handle) = server.as_mut()
                && tokio::time::timeout(SERVER_STOP_TIMEOUT, handle).await.is_err()
            {
                tracing::warn!("Status server did not stop in time");
            }
            *server = None;
        }

        self.context.shutdown().await;

        let metadata_sync = self.metadata_sync.lock().take();
        if let Some(sync) = metadata_sync {
            sync.abort();
        }

        if let Err(e) = self.discovery.remove() {
            tracing::warn!(error = %e, "Failed to remove discovery file");
        }

        tracing::info!("Data service stopped");
    }
}

fn idle_callback(shutdown: CancellationToken) -> impl FnOnce() + Send + 'static {
    move || {
        tracing::info!("No consumers left, shutting down");
        shutdown.cancel();
    }
}

/// Idle callback for [`ServiceProcess::start_with_context`].
#[must_use]
pub fn idle_shutdown(shutdown: &CancellationToken) -> impl FnOnce() + Send + 'static {
    idle_callback(shutdown.clone())
}

fn prepare(config: &ServiceConfig) -> Result<(), ServiceError> {
    std::fs::create_dir_all(&config.data_dir).map_err(|source| ServiceError::DataDir {
        path: config.data_dir.clone(),
        source,
    })
}

async fn abort_startup(
    context: &ServiceContext,
    metadata_sync: Option<JoinHandle<()>>,
    shutdown: &CancellationToken,
) {
    shutdown.cancel();
    if let Some(sync) = metadata_sync {
        sync.abort();
    }
    context.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::{LiveStreamError, listener};

    fn config(dir: &std::path::Path) -> ServiceConfig {
        let mut config = ServiceConfig::with_data_dir(dir.join("data"));
        config.server.port = 0;
        config.metadata.enabled = false;
        config
    }

    #[tokio::test]
    async fn start_publishes_port_and_shutdown_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let discovery = DiscoveryFile::new(&config.discovery_file);

        let process = ServiceProcess::start(config).await.unwrap();
        assert_eq!(discovery.read_port().unwrap(), Some(process.port()));

        let status = reqwest::get(format!("http://127.0.0.1:{}/healthz", process.port()))
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::OK);

        process.shutdown().await;
        assert_eq!(discovery.read_port().unwrap(), None);
        assert!(process.shutdown_token().is_cancelled());

        // Second call is a no-op
        process.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_finishes_teardown_left_by_dropped_wait() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let discovery = DiscoveryFile::new(&config.discovery_file);
        let process = ServiceProcess::start(config).await.unwrap();

        // Idle shutdown fires, then a stop signal wins the race against `wait`.
        process.shutdown_token().cancel();
        {
            let mut wait = Box::pin(process.wait());
            let _ = futures::poll!(wait.as_mut());
        }

        process.shutdown().await;
        assert_eq!(discovery.read_port().unwrap(), None);

        let err = process
            .context()
            .candles
            .subscribe(&"BTCUSDT:1m".parse().unwrap(), listener(|_| Ok(())), None)
            .unwrap_err();
        assert_eq!(err, LiveStreamError::ShuttingDown);
    }

    #[tokio::test]
    async fn concurrent_wait_and_shutdown_both_finish() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let discovery = DiscoveryFile::new(&config.discovery_file);
        let process = ServiceProcess::start(config).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(process.wait(), process.shutdown());
        })
        .await
        .unwrap();
        assert_eq!(discovery.read_port().unwrap(), None);
    }

    #[tokio::test]
    async fn bind_failure_is_reported_without_discovery_file() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut config = config(dir.path());
        config.server.port = occupied.local_addr().unwrap().port();
        let discovery = DiscoveryFile::new(&config.discovery_file);

        let err = ServiceProcess::start(config).await.unwrap_err();
        assert!(matches!(err, ServiceError::Server(StatusServerError::BindFailed(..))));
        assert_eq!(discovery.read_port().unwrap(), None);
    }

    #[tokio::test]
    async fn idle_callback_requests_shutdown() {
        let token = CancellationToken::new();
        idle_shutdown(&token)();
        assert!(token.is_cancelled());
    }
}
