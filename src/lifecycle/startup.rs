//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter
//! - Install the process-wide control plane
//! - Start background tasks and the admin listener
//! - Block until a termination signal, then drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use super::{maintenance, signals, Shutdown};
use crate::admin::{self, AdminState};
use crate::config::GuardConfig;
use crate::guard::{AlreadyInstalled, ControlPlane};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    AlreadyInstalled(#[from] AlreadyInstalled),

    #[error("invalid address '{0}'")]
    Address(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("admin endpoint failed: {0}")]
    Admin(#[source] std::io::Error),
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(config: GuardConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let admin_config = config.admin.clone();
    let interval = Duration::from_secs(config.maintenance.interval_secs);
    let plane = ControlPlane::install(config)?;

    let shutdown = Arc::new(Shutdown::new());
    let _signals = signals::spawn_signal_handler(Arc::clone(&shutdown));

    let maintenance = tokio::spawn(maintenance::run(Arc::clone(&plane), interval, shutdown.subscribe()));

    let result = if admin_config.enabled {
        let listener = TcpListener::bind(&admin_config.bind_address)
            .await
            .map_err(|source| StartupError::Bind {
                address: admin_config.bind_address.clone(),
                source,
            })?;
        let state = AdminState::new(Arc::clone(&plane), &admin_config.api_key);
        admin::serve(listener, state, shutdown.subscribe())
            .await
            .map_err(StartupError::Admin)
    } else {
        tracing::info!("Admin endpoint disabled");
        shutdown.subscribe().recv().await;
        Ok(())
    };

    shutdown.trigger();
    if let Err(e) = maintenance.await {
        tracing::error!(error = %e, "Maintenance task panicked");
    }

    tracing::info!(stats = ?plane.stats().credentials, "Shutdown complete");
    result
}
