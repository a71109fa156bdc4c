//! JSON HTTP API

mod router;

pub use router::{ApiError, AppState, create_router};

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::assemble::Assembler;
use crate::cache::SnapshotCache;
use crate::config::Config;
use crate::{Error, Result};

/// API server
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    /// Build the server and its HTTP clients
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let assembler = Arc::new(Assembler::from_config(&config)?);
        Ok(Self::with_assembler(config, assembler))
    }

    /// Build the server around an existing assembler
    #[must_use]
    pub fn with_assembler(config: Config, assembler: Arc<Assembler>) -> Self {
        let snapshots = SnapshotCache::from_config(&config.cache);
        Self {
            state: Arc::new(AppState::new(assembler, snapshots)),
            config,
        }
    }

    /// Bind the configured address and serve until Ctrl+C / SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves
    ///
    /// In-flight requests get `server.shutdown_timeout` to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        info!(
            version = env!("CARGO_PKG_VERSION"),
            addr = %local_addr,
            cache = self.state.snapshots.is_some(),
            "Listening"
        );

        if let Some(ttl) = self.state.snapshots.as_ref().map(|_| self.config.cache.ttl) {
            let state = Arc::clone(&self.state);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(ttl);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Some(snapshots) = &state.snapshots {
                                snapshots.evict_expired();
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        let trigger = {
            let shutdown_tx = shutdown_tx.clone();
            async move {
                shutdown.await;
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        };
        let app = create_router(Arc::clone(&self.state));
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(trigger)
            .into_future();

        let mut drain_rx = shutdown_tx.subscribe();
        let drain_timeout = self.config.server.shutdown_timeout;
        tokio::select! {
            result = serve => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = async {
                let _ = drain_rx.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!(timeout = ?drain_timeout, "Shutdown timeout elapsed, dropping open connections");
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
