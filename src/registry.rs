//! Named rate limiters, circuit breakers and quota trackers, one set per scope.
//!
//! Scopes are created on first access from the configured defaults plus any
//! per-scope tier overrides, then live for the rest of the process.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::{self, Clock};
use crate::config::{CircuitBreakerSettings, RateLimitConfig};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerStats, QuotaStats, QuotaTracker, RateLimiter, RateLimiterStats,
};

/// Scope used when a caller does not name one.
pub const DEFAULT_SCOPE: &str = "default";

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub rate_limits: Vec<RateLimiterStats>,
    pub breakers: Vec<CircuitBreakerStats>,
    pub quota: Vec<QuotaStats>,
}

#[derive(Debug)]
pub struct Registry {
    rate_limit: RateLimitConfig,
    breaker: CircuitBreakerSettings,
    limiters: DashMap<String, Arc<RateLimiter>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    quotas: DashMap<String, Arc<QuotaTracker>>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(rate_limit: RateLimitConfig, breaker: CircuitBreakerSettings) -> Self {
        Self::with_clock(rate_limit, breaker, clock::system())
    }

    pub fn with_clock(
        rate_limit: RateLimitConfig,
        breaker: CircuitBreakerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rate_limit,
            breaker,
            limiters: DashMap::new(),
            breakers: DashMap::new(),
            quotas: DashMap::new(),
            clock,
        }
    }

    /// The limiter for `scope`, created on first use.
    pub fn limiter(&self, scope: &str) -> Arc<RateLimiter> {
        if let Some(existing) = self.limiters.get(scope) {
            return Arc::clone(existing.value());
        }
        let entry = self.limiters.entry(scope.to_string()).or_insert_with(|| {
            let windows = self.rate_limit.tiers_for(scope).windows();
            Arc::new(RateLimiter::with_clock(scope, windows, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    /// The breaker for `scope`, created on first use.
    pub fn breaker(&self, scope: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(scope) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(scope.to_string()).or_insert_with(|| {
            Arc::new(
                CircuitBreaker::new(scope, self.breaker.breaker_config())
                    .with_clock(Arc::clone(&self.clock))
                    .counting(self.breaker.counted_kinds.clone()),
            )
        });
        Arc::clone(entry.value())
    }

    /// The quota tracker for `scope`, created on first use.
    pub fn quota(&self, scope: &str) -> Arc<QuotaTracker> {
        if let Some(existing) = self.quotas.get(scope) {
            return Arc::clone(existing.value());
        }
        let entry = self.quotas.entry(scope.to_string()).or_insert_with(|| {
            let per_day = self.rate_limit.tiers_for(scope).requests_per_day;
            Arc::new(QuotaTracker::with_clock(scope, per_day, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    /// Force every known breaker closed. Returns how many were reset.
    pub fn reset_all_breakers(&self) -> usize {
        let mut count = 0;
        for breaker in self.breakers.iter() {
            breaker.reset();
            count += 1;
        }
        tracing::warn!(count, "All circuit breakers manually reset");
        count
    }

    /// Clear every limiter window and quota tracker. Returns how many scopes
    /// had a limiter.
    pub fn reset_all_limiters(&self) -> usize {
        let mut count = 0;
        for limiter in self.limiters.iter() {
            limiter.reset();
            count += 1;
        }
        for tracker in self.quotas.iter() {
            tracker.reset();
        }
        tracing::warn!(count, "All rate limiters manually reset");
        count
    }

    /// Names of scopes with any registered primitive.
    pub fn scopes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .limiters
            .iter()
            .map(|e| e.key().clone())
            .chain(self.breakers.iter().map(|e| e.key().clone()))
            .chain(self.quotas.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn all_stats(&self) -> RegistryStats {
        let mut rate_limits: Vec<_> = self.limiters.iter().map(|e| e.value().stats()).collect();
        rate_limits.sort_by(|a, b| a.name.cmp(&b.name));
        let mut breakers: Vec<_> = self.breakers.iter().map(|e| e.value().stats()).collect();
        breakers.sort_by(|a, b| a.name.cmp(&b.name));
        let mut quota: Vec<_> = self.quotas.iter().map(|e| e.value().stats()).collect();
        quota.sort_by(|a, b| a.name.cmp(&b.name));
        RegistryStats {
            rate_limits,
            breakers,
            quota,
        }
    }
}
