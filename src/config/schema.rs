//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy, WindowSpec};

/// Root configuration for the resilience control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Credential pool sources.
    pub credentials: CredentialsConfig,

    /// Tiered rate limits, with optional per-scope overrides.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerSettings,

    /// Result cache.
    pub cache: CacheConfig,

    /// Orchestrator retry budget.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoint.
    pub admin: AdminConfig,

    /// Background maintenance.
    pub maintenance: MaintenanceConfig,
}

/// Where credentials come from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Inline credentials, in rotation order.
    pub keys: Vec<String>,

    /// Environment prefix for numbered entries (`PREFIX`, `PREFIX1`, ...).
    /// `None` disables environment lookup.
    pub env_prefix: Option<String>,

    /// Highest numbered suffix to probe.
    pub max_numbered: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            env_prefix: Some("GOOGLE_API_KEY".to_string()),
            max_numbered: 10,
        }
    }
}

/// Minute/hour/day limits. A missing or zero limit leaves that tier unenforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TierConfig {
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub requests_per_day: Option<u32>,
}

impl TierConfig {
    /// Windows for every enforced tier.
    pub fn windows(&self) -> Vec<WindowSpec> {
        let enforced = |limit: Option<u32>| limit.filter(|l| *l > 0);
        [
            enforced(self.requests_per_minute).map(WindowSpec::per_minute),
            enforced(self.requests_per_hour).map(WindowSpec::per_hour),
            enforced(self.requests_per_day).map(WindowSpec::per_day),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Fields set here win; the rest come from `base`.
    pub fn over(&self, base: &TierConfig) -> TierConfig {
        TierConfig {
            requests_per_minute: self.requests_per_minute.or(base.requests_per_minute),
            requests_per_hour: self.requests_per_hour.or(base.requests_per_hour),
            requests_per_day: self.requests_per_day.or(base.requests_per_day),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub requests_per_day: Option<u32>,

    /// How long a protected call may block waiting for a slot.
    /// Zero means never block.
    pub acquire_timeout_secs: f64,

    /// Per-scope tier overrides, keyed by scope name.
    pub scopes: BTreeMap<String, TierConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: Some(60),
            requests_per_hour: None,
            requests_per_day: Some(1500),
            acquire_timeout_secs: 30.0,
            scopes: BTreeMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn default_tiers(&self) -> TierConfig {
        TierConfig {
            requests_per_minute: self.requests_per_minute,
            requests_per_hour: self.requests_per_hour,
            requests_per_day: self.requests_per_day,
        }
    }

    /// Effective tiers for `scope`.
    pub fn tiers_for(&self, scope: &str) -> TierConfig {
        let base = self.default_tiers();
        match self.scopes.get(scope) {
            Some(overrides) => overrides.over(&base),
            None => base,
        }
    }

    /// Saturates at `Duration::MAX`; NaN and negatives mean zero.
    pub fn acquire_timeout(&self) -> Duration {
        if self.acquire_timeout_secs.is_nan() {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.acquire_timeout_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive counted failures before opening.
    pub failure_threshold: u32,

    /// Seconds to stay open before probing.
    pub timeout_secs: u64,

    /// Probe calls admitted while half-open; this many successes close it.
    pub half_open_max_calls: u32,

    /// Failure kinds that count toward opening.
    pub counted_kinds: Vec<ErrorKind>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 60,
            half_open_max_calls: 2,
            counted_kinds: ErrorKind::ALL.to_vec(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 1800,
            max_size: 100,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per protected call, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin endpoint.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin endpoint bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // Placeholder; validation rejects it when the endpoint is enabled.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between cache sweeps and gauge refreshes.
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}
