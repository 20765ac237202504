//! Periodic background upkeep.
//!
//! # Responsibilities
//! - Sweep expired cache entries
//! - Refresh cache-size and breaker-state gauges

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::ShutdownListener;
use crate::guard::ControlPlane;

pub async fn run(plane: Arc<ControlPlane>, interval: Duration, mut shutdown: ShutdownListener) {
    tracing::info!(interval_secs = interval.as_secs(), "Maintenance task starting");

    let mut ticker = time::interval(interval);
    // The first tick fires immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = plane.run_maintenance();
                if removed > 0 {
                    tracing::info!(removed, "Maintenance removed expired cache entries");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Maintenance task received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
