use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::json;

use super::AdminState;
use crate::cache::CacheStats;
use crate::credentials::CredentialPoolStats;
use crate::resilience::{CircuitBreakerStats, CircuitState, QuotaStats, RateLimiterStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    /// "operational", "degraded" (a breaker is open or a scope is near its
    /// quota) or "exhausted".
    pub status: &'static str,
    pub uptime_secs: f64,
    pub credentials_available: usize,
    pub scopes: usize,
    pub open_breakers: Vec<String>,
    pub quota_exhausted: Vec<String>,
}

/// Limiter windows alongside quota pressure for every scope.
#[derive(Serialize)]
pub struct RateLimitReport {
    pub limiters: Vec<RateLimiterStats>,
    pub quota: Vec<QuotaStats>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let stats = state.plane.stats();
    let open_breakers: Vec<String> = stats
        .scopes
        .breakers
        .iter()
        .filter(|b| b.state != CircuitState::Closed)
        .map(|b| b.name.clone())
        .collect();
    let quota_exhausted: Vec<String> = stats
        .scopes
        .quota
        .iter()
        .filter(|q| q.exhausted)
        .map(|q| q.name.clone())
        .collect();

    let status = if stats.credentials.available == 0 {
        "exhausted"
    } else if !open_breakers.is_empty() || !quota_exhausted.is_empty() {
        "degraded"
    } else {
        "operational"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        uptime_secs: stats.uptime_secs,
        credentials_available: stats.credentials.available,
        scopes: state.plane.registry().scopes().len(),
        open_breakers,
        quota_exhausted,
    })
}

pub async fn get_credentials(State(state): State<AdminState>) -> Json<CredentialPoolStats> {
    Json(state.plane.pool().stats())
}

pub async fn get_rate_limits(State(state): State<AdminState>) -> Json<RateLimitReport> {
    let stats = state.plane.registry().all_stats();
    Json(RateLimitReport {
        limiters: stats.rate_limits,
        quota: stats.quota,
    })
}

pub async fn reset_rate_limits(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let reset = state.plane.registry().reset_all_limiters();
    Json(json!({ "reset": reset }))
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<CircuitBreakerStats>> {
    Json(state.plane.registry().all_stats().breakers)
}

pub async fn reset_breakers(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let reset = state.plane.registry().reset_all_breakers();
    Json(json!({ "reset": reset }))
}

pub async fn get_cache(State(state): State<AdminState>) -> Result<Json<CacheStats>, StatusCode> {
    state
        .plane
        .cache()
        .map(|cache| Json(cache.stats()))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn cleanup_cache(State(state): State<AdminState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let cache = state.plane.cache().ok_or(StatusCode::NOT_FOUND)?;
    let removed = cache.cleanup_expired();
    Ok(Json(json!({ "removed": removed, "size": cache.len() })))
}
