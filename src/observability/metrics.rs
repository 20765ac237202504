//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_calls_total` (counter): protected calls by outcome
//! - `guard_rate_limited_total` (counter): rejected acquisitions by scope
//! - `guard_circuit_state` (gauge): 0=closed, 1=open, 2=half_open, by name
//! - `guard_circuit_opened_total` (counter): trips by breaker name
//! - `guard_quota_errors_total` (counter): remote quota errors by scope
//! - `guard_credential_rotations_total` (counter)
//! - `guard_credentials_revoked_total` (counter)
//! - `guard_cache_requests_total` (counter): lookups by result
//! - `guard_cache_size` (gauge): live cache entries

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Prometheus exporter listening");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus exporter");
        }
    }
}

fn describe_metrics() {
    describe_counter!("guard_calls_total", "Protected calls by outcome");
    describe_counter!("guard_rate_limited_total", "Rate limit rejections by scope");
    describe_gauge!("guard_circuit_state", "Circuit state (0=closed, 1=open, 2=half_open)");
    describe_counter!("guard_circuit_opened_total", "Times a circuit opened");
    describe_counter!("guard_quota_errors_total", "Remote quota errors by scope");
    describe_counter!("guard_credential_rotations_total", "Credential rotations");
    describe_counter!("guard_credentials_revoked_total", "Credentials revoked as compromised");
    describe_counter!("guard_cache_requests_total", "Cache lookups by result");
    describe_gauge!("guard_cache_size", "Live cache entries");
}

/// Outcome label for `guard_calls_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    CacheHit,
    RateLimited,
    CircuitOpen,
    Exhausted,
    Failed,
}

impl CallOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CacheHit => "cache_hit",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
        }
    }
}

pub fn record_call(outcome: CallOutcome) {
    counter!("guard_calls_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_rate_limited(scope: &str) {
    counter!("guard_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_circuit_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!("guard_circuit_state", "name" => name.to_string()).set(value);
}

pub fn record_circuit_opened(name: &str) {
    counter!("guard_circuit_opened_total", "name" => name.to_string()).increment(1);
}

pub fn record_quota_error(scope: &str) {
    counter!("guard_quota_errors_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_credential_rotation() {
    counter!("guard_credential_rotations_total").increment(1);
}

pub fn record_credential_revoked() {
    counter!("guard_credentials_revoked_total").increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("guard_cache_requests_total", "result" => result).increment(1);
}

pub fn record_cache_size(size: usize) {
    gauge!("guard_cache_size").set(size as f64);
}
