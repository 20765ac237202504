//! Admin endpoint: read-only stats plus operator overrides.
//!
//! Every route sits behind bearer-token auth. Credentials are never
//! returned, only counts and positions.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::guard::ControlPlane;
use crate::lifecycle::ShutdownListener;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub plane: Arc<ControlPlane>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(plane: Arc<ControlPlane>, api_key: &str) -> Self {
        Self {
            plane,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/credentials", get(get_credentials))
        .route("/admin/rate-limits", get(get_rate_limits))
        .route("/admin/rate-limits/reset", post(reset_rate_limits))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/reset", post(reset_breakers))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/cleanup", post(cleanup_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin router on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: ShutdownListener,
) -> Result<(), std::io::Error> {
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin endpoint listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;

    tracing::info!("Admin endpoint stopped");
    Ok(())
}
