//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order (metrics, server, listener)
//! - Wire OS signals to the shutdown coordinator
//! - Run the server until shutdown completes
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, once the server is fully built

use thiserror::Error;

use crate::config::ProxyConfig;
use crate::http::{ProxyServer, ServerError};
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;

/// Fatal startup or runtime error.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address `{0}`")]
    MetricsAddress(String),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Start every subsystem and serve until SIGINT or SIGTERM.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let server = ProxyServer::new(config)?;
    let listener = Listener::bind(&server.config().listener).await?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let signal = signals::wait_for_signal().await;
        tracing::info!(signal, "Shutdown signal received");
        shutdown.trigger();
    });

    server.run(listener, receiver).await?;
    Ok(())
}
