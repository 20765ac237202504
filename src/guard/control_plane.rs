use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::{CacheStats, TtlCache};
use crate::clock::{self, Clock};
use crate::config::GuardConfig;
use crate::credentials::{CredentialPool, CredentialPoolStats};
use crate::guard::{Downstream, ProtectedCaller};
use crate::observability::metrics;
use crate::registry::{Registry, RegistryStats};

static GLOBAL: OnceLock<Arc<ControlPlane>> = OnceLock::new();

/// A control plane was already installed for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("control plane already installed")]
pub struct AlreadyInstalled;

/// Everything the admin endpoint reports.
#[derive(Debug, Clone, Serialize)]
pub struct ControlPlaneStats {
    pub uptime_secs: f64,
    pub credentials: CredentialPoolStats,
    #[serde(flatten)]
    pub scopes: RegistryStats,
    pub cache: Option<CacheStats>,
}

/// The shared credential pool, scope registry and result cache.
#[derive(Debug)]
pub struct ControlPlane {
    config: GuardConfig,
    pool: Arc<CredentialPool>,
    registry: Registry,
    cache: Option<Arc<TtlCache<String, Value>>>,
    clock: Arc<dyn Clock>,
    started_at: Instant,
}

impl ControlPlane {
    pub fn new(config: GuardConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    pub fn with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        let pool = Arc::new(CredentialPool::new(config.credentials.keys.iter().map(String::as_str)));
        let registry = Registry::with_clock(
            config.rate_limit.clone(),
            config.circuit_breaker.clone(),
            Arc::clone(&clock),
        );
        let cache = config.cache.enabled.then(|| {
            Arc::new(TtlCache::with_clock(
                config.cache.ttl(),
                config.cache.max_size,
                Arc::clone(&clock),
            ))
        });
        let started_at = clock.now();

        tracing::info!(
            credentials = pool.len(),
            cache_enabled = cache.is_some(),
            "Control plane ready"
        );

        Self {
            config,
            pool,
            registry,
            cache,
            clock,
            started_at,
        }
    }

    /// Build the process-wide instance. Only the first call succeeds.
    pub fn install(config: GuardConfig) -> Result<Arc<ControlPlane>, AlreadyInstalled> {
        let plane = Arc::new(Self::new(config));
        GLOBAL.set(Arc::clone(&plane)).map_err(|_| AlreadyInstalled)?;
        Ok(plane)
    }

    /// The process-wide instance, if [`install`](Self::install) has run.
    pub fn global() -> Option<Arc<ControlPlane>> {
        GLOBAL.get().cloned()
    }

    /// A protected caller for `scope`, wired to the shared primitives.
    pub fn caller<D: Downstream>(&self, scope: &str, downstream: D) -> ProtectedCaller<D> {
        let caller = ProtectedCaller::new(
            downstream,
            Arc::clone(&self.pool),
            self.registry.limiter(scope),
            self.registry.breaker(scope),
        )
        .with_quota_tracker(self.registry.quota(scope))
        .with_acquire_timeout(self.config.rate_limit.acquire_timeout())
        .with_retry(self.config.retries.policy());

        match &self.cache {
            Some(cache) => caller.with_cache(Arc::clone(cache), None),
            None => caller,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> Option<&Arc<TtlCache<String, Value>>> {
        self.cache.as_ref()
    }

    pub fn stats(&self) -> ControlPlaneStats {
        ControlPlaneStats {
            uptime_secs: self.clock.now().saturating_duration_since(self.started_at).as_secs_f64(),
            credentials: self.pool.stats(),
            scopes: self.registry.all_stats(),
            cache: self.cache.as_ref().map(|c| c.stats()),
        }
    }

    /// Sweep expired cache entries and refresh gauges. Returns entries removed.
    pub fn run_maintenance(&self) -> usize {
        let removed = match &self.cache {
            Some(cache) => {
                let removed = cache.cleanup_expired();
                metrics::record_cache_size(cache.len());
                removed
            }
            None => 0,
        };
        for breaker in self.registry.all_stats().breakers {
            metrics::record_circuit_state(&breaker.name, breaker.state);
        }
        tracing::debug!(removed, "Maintenance pass complete");
        removed
    }
}
