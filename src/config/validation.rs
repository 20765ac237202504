//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, at least one enforced tier)
//! - Check addresses parse before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GuardConfig, TierConfig};

/// Longest a protected call may block on the rate limiter (one day).
pub const MAX_ACQUIRE_TIMEOUT_SECS: f64 = 86_400.0;

/// Longest a cached result may live (one year).
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 86_400;

/// Longest a breaker may stay open before probing (one day).
pub const MAX_BREAKER_TIMEOUT_SECS: u64 = 86_400;

/// One semantic problem, tagged with the dotted path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.credentials.keys.is_empty() {
        errors.push(ValidationError::new(
            "credentials",
            "no credentials configured (inline keys or numbered environment entries)",
        ));
    }

    check_tiers("rate_limit", &config.rate_limit.default_tiers(), &mut errors);
    for scope in config.rate_limit.scopes.keys() {
        let field = format!("rate_limit.scopes.{scope}");
        check_tiers(&field, &config.rate_limit.tiers_for(scope), &mut errors);
    }
    let acquire_timeout = config.rate_limit.acquire_timeout_secs;
    if !(0.0..=MAX_ACQUIRE_TIMEOUT_SECS).contains(&acquire_timeout) {
        errors.push(ValidationError::new(
            "rate_limit.acquire_timeout_secs",
            format!("must be between 0 and {MAX_ACQUIRE_TIMEOUT_SECS}"),
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if breaker.timeout_secs == 0 || breaker.timeout_secs > MAX_BREAKER_TIMEOUT_SECS {
        errors.push(ValidationError::new(
            "circuit_breaker.timeout_secs",
            format!("must be between 1 and {MAX_BREAKER_TIMEOUT_SECS}"),
        ));
    }
    if breaker.half_open_max_calls == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_calls", "must be > 0"));
    }
    if breaker.counted_kinds.is_empty() {
        errors.push(ValidationError::new(
            "circuit_breaker.counted_kinds",
            "at least one failure kind must count",
        ));
    }

    if config.cache.enabled {
        if config.cache.max_size == 0 {
            errors.push(ValidationError::new("cache.max_size", "must be > 0 when the cache is enabled"));
        }
        if config.cache.ttl_secs == 0 {
            errors.push(ValidationError::new("cache.ttl_secs", "must be > 0 when the cache is enabled"));
        }
        if config.cache.ttl_secs > MAX_CACHE_TTL_SECS {
            errors.push(ValidationError::new(
                "cache.ttl_secs",
                format!("must not exceed {MAX_CACHE_TTL_SECS}"),
            ));
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.observability.metrics_enabled {
        check_address("observability.metrics_address", &config.observability.metrics_address, &mut errors);
    }

    if config.admin.enabled {
        check_address("admin.bind_address", &config.admin.bind_address, &mut errors);
        if config.admin.api_key.is_empty() || config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set to a real secret when the admin endpoint is enabled",
            ));
        }
    }

    if config.maintenance.interval_secs == 0 {
        errors.push(ValidationError::new("maintenance.interval_secs", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_tiers(field: &str, tiers: &TierConfig, errors: &mut Vec<ValidationError>) {
    if tiers.windows().is_empty() {
        errors.push(ValidationError::new(field, "at least one tier must have a limit"));
    }
}

fn check_address(field: &str, address: &str, errors: &mut Vec<ValidationError>) {
    if address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{address}'")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GuardConfig {
        let mut config = GuardConfig::default();
        config.credentials.keys = vec!["key-a".into()];
        config
    }

    #[test]
    fn test_default_with_credentials_is_valid() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GuardConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        config.cache.max_size = 0;
        config.retries.max_attempts = 0;
        config.observability.metrics_address = "not an address".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"credentials"));
        assert!(fields.contains(&"circuit_breaker.failure_threshold"));
        assert!(fields.contains(&"cache.max_size"));
        assert!(fields.contains(&"retries.max_attempts"));
        assert!(fields.contains(&"observability.metrics_address"));
    }

    #[test]
    fn test_requires_an_enforced_tier() {
        let mut config = valid();
        config.rate_limit.requests_per_minute = None;
        config.rate_limit.requests_per_day = Some(0);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "rate_limit");
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        let mut config = valid();
        config.rate_limit.acquire_timeout_secs = 1e30;
        config.cache.ttl_secs = u64::MAX;
        config.circuit_breaker.timeout_secs = u64::MAX;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["rate_limit.acquire_timeout_secs", "circuit_breaker.timeout_secs", "cache.ttl_secs"]
        );

        config.rate_limit.acquire_timeout_secs = f64::NAN;
        config.cache.ttl_secs = MAX_CACHE_TTL_SECS;
        config.circuit_breaker.timeout_secs = MAX_BREAKER_TIMEOUT_SECS;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "rate_limit.acquire_timeout_secs");

        config.rate_limit.acquire_timeout_secs = MAX_ACQUIRE_TIMEOUT_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_admin_requires_real_key() {
        let mut config = valid();
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");

        config.admin.api_key = "s3cret".into();
        assert!(validate_config(&config).is_ok());
    }
}
