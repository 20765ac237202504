use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::TtlCache;
use crate::credentials::CredentialPool;
use crate::error::{ErrorKind, GuardError, GuardResult};
use crate::guard::Downstream;
use crate::observability::metrics::{self, CallOutcome};
use crate::resilience::{CircuitBreaker, QuotaTracker, RateLimiter, RetryDecision, RetryPolicy};

/// A failed attempt, plus whether the pool switched credentials because of it.
struct Failure {
    error: GuardError,
    rotated: bool,
}

impl From<GuardError> for Failure {
    fn from(error: GuardError) -> Self {
        Self { error, rotated: false }
    }
}

/// Runs one downstream operation through cache, limiter, pool and breaker.
pub struct ProtectedCaller<D> {
    downstream: D,
    pool: Arc<CredentialPool>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    cache: Option<Arc<TtlCache<String, Value>>>,
    cache_ttl: Option<Duration>,
    quota: Option<Arc<QuotaTracker>>,
    acquire_timeout: Duration,
    retry: RetryPolicy,
}

impl<D: Downstream> ProtectedCaller<D> {
    /// No cache, non-blocking admission, single attempt.
    pub fn new(downstream: D, pool: Arc<CredentialPool>, limiter: Arc<RateLimiter>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            downstream,
            pool,
            limiter,
            breaker,
            cache: None,
            cache_ttl: None,
            quota: None,
            acquire_timeout: Duration::ZERO,
            retry: RetryPolicy::none(),
        }
    }

    /// Memoize successful responses; `ttl` of `None` uses the cache default.
    pub fn with_cache(mut self, cache: Arc<TtlCache<String, Value>>, ttl: Option<Duration>) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    /// Count downstream successes and quota errors against `tracker`.
    pub fn with_quota_tracker(mut self, tracker: Arc<QuotaTracker>) -> Self {
        self.quota = Some(tracker);
        self
    }

    /// Block up to `timeout` for a rate-limit slot. Zero never blocks.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn scope(&self) -> &str {
        self.limiter.name()
    }

    pub fn downstream(&self) -> &D {
        &self.downstream
    }

    /// One pass through the protected path. Errors are surfaced unchanged
    /// after the pool and breaker have seen them.
    pub fn call(&self, request: &D::Request) -> GuardResult<D::Response> {
        self.attempt(request).map_err(|failure| failure.error)
    }

    /// Like [`call`](Self::call), repeated while the retry policy allows.
    pub fn call_with_retry(&self, request: &D::Request) -> GuardResult<D::Response> {
        let mut attempt = 1;
        loop {
            let failure = match self.attempt(request) {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            match self.retry.decide(attempt, &failure.error, failure.rotated) {
                RetryDecision::Stop => return Err(failure.error),
                RetryDecision::RetryNow => {
                    tracing::info!(
                        scope = %self.scope(),
                        attempt,
                        error = %failure.error,
                        "Retrying with rotated credential"
                    );
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::info!(
                        scope = %self.scope(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "Retrying after backoff"
                    );
                    std::thread::sleep(delay);
                }
            }
            attempt += 1;
        }
    }

    fn attempt(&self, request: &D::Request) -> Result<D::Response, Failure> {
        let key = self.cache_key(request);
        if let Some(hit) = self.cached(key.as_deref()) {
            metrics::record_call(CallOutcome::CacheHit);
            return Ok(hit);
        }

        if !self.admit() {
            metrics::record_call(CallOutcome::RateLimited);
            return Err(GuardError::RateLimitExceeded {
                scope: self.scope().to_string(),
                retry_after: self.limiter.time_until_available(),
            }
            .into());
        }

        let credential = match self.pool.current() {
            Ok(credential) => credential,
            Err(e) => {
                metrics::record_call(CallOutcome::Exhausted);
                tracing::error!(scope = %self.scope(), error = %e, "Credential pool exhausted");
                return Err(GuardError::from(e).into());
            }
        };

        let result = self
            .breaker
            .call(|| self.downstream.call(&credential, request).map_err(GuardError::from));

        match result {
            Ok(response) => {
                metrics::record_call(CallOutcome::Success);
                if let Some(quota) = &self.quota {
                    quota.record_success();
                }
                self.store(key, &response);
                Ok(response)
            }
            Err(error) => {
                let rotated = match &error {
                    GuardError::Downstream(e) if e.kind.affects_credentials() => {
                        self.pool.handle_error_for(&credential, &error)
                    }
                    _ => false,
                };
                if let (Some(quota), GuardError::Downstream(e)) = (&self.quota, &error) {
                    if e.kind == ErrorKind::Quota {
                        quota.record_quota_error(&e.message);
                    }
                }
                let outcome = match &error {
                    GuardError::CircuitOpen(_) => CallOutcome::CircuitOpen,
                    _ => CallOutcome::Failed,
                };
                metrics::record_call(outcome);
                tracing::warn!(
                    scope = %self.scope(),
                    credential = %credential,
                    rotated,
                    error = %error,
                    "Protected call failed"
                );
                Err(Failure { error, rotated })
            }
        }
    }

    fn admit(&self) -> bool {
        if self.acquire_timeout.is_zero() {
            self.limiter.try_acquire()
        } else {
            self.limiter.acquire(Some(self.acquire_timeout))
        }
    }

    fn cache_key(&self, request: &D::Request) -> Option<String> {
        self.cache.as_ref()?;
        let key = self.downstream.cache_key(request)?;
        Some(format!("{}:{}", self.scope(), key))
    }

    fn cached(&self, key: Option<&str>) -> Option<D::Response> {
        let (cache, key) = (self.cache.as_ref()?, key?);
        let value = cache.get(&key.to_string())?;
        match serde_json::from_value(value) {
            Ok(response) => {
                tracing::debug!(scope = %self.scope(), "Served from cache");
                Some(response)
            }
            Err(e) => {
                tracing::warn!(scope = %self.scope(), error = %e, "Dropping undecodable cache entry");
                cache.invalidate(&key.to_string());
                None
            }
        }
    }

    fn store(&self, key: Option<String>, response: &D::Response) {
        let (Some(cache), Some(key)) = (self.cache.as_ref(), key) else {
            return;
        };
        match serde_json::to_value(response) {
            Ok(value) => cache.set(key, value, self.cache_ttl),
            Err(e) => tracing::warn!(scope = %self.scope(), error = %e, "Response not cacheable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::error::{DownstreamError, ErrorKind};
    use crate::resilience::{CircuitBreakerConfig, CircuitState, WindowSpec};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted outcomes and records which credential each call used.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<String, DownstreamError>>>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<String, DownstreamError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Downstream for Scripted {
        type Request = str;
        type Response = String;

        fn call(&self, credential: &Credential, request: &str) -> Result<String, DownstreamError> {
            self.seen.lock().push(credential.expose().to_string());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("echo:{request}")))
        }

        fn cache_key(&self, request: &str) -> Option<String> {
            Some(request.to_string())
        }
    }

    fn caller(outcomes: Vec<Result<String, DownstreamError>>) -> ProtectedCaller<Scripted> {
        let pool = Arc::new(CredentialPool::new(["key-a", "key-b", "key-c"]));
        let limiter = Arc::new(RateLimiter::new("test", vec![WindowSpec::per_minute(100)]));
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..CircuitBreakerConfig::default()
            },
        ));
        ProtectedCaller::new(Scripted::new(outcomes), pool, limiter, breaker)
    }

    #[test]
    fn test_success_is_cached() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60), 10));
        let caller = caller(vec![]).with_cache(Arc::clone(&cache), None);

        assert_eq!(caller.call("hello").unwrap(), "echo:hello");
        assert_eq!(caller.call("hello").unwrap(), "echo:hello");
        assert_eq!(caller.downstream().seen.lock().len(), 1);
        assert!(cache.contains(&"test:hello".to_string()));
    }

    #[test]
    fn test_quota_error_rotates_and_surfaces() {
        let caller = caller(vec![Err(DownstreamError::quota("429"))]);

        let err = caller.call("x").unwrap_err();
        assert_eq!(err.failure_kind(), Some(ErrorKind::Quota));
        assert_eq!(caller.pool.current_index(), 1);

        caller.call("y").unwrap();
        assert_eq!(*caller.downstream().seen.lock(), vec!["key-a", "key-b"]);
    }

    #[test]
    fn test_leaked_error_revokes_credential() {
        let caller = caller(vec![Err(DownstreamError::leaked("key reported as leaked"))]);

        caller.call("x").unwrap_err();
        assert_eq!(caller.pool.len(), 2);
        assert_eq!(caller.pool.revoked_count(), 1);
        // Revocation leaves the pool on key-b, then the rotation moves past it.
        assert_eq!(caller.pool.current().unwrap().expose(), "key-c");
    }

    #[test]
    fn test_rate_limited_when_no_slot() {
        let pool = Arc::new(CredentialPool::new(["key-a"]));
        let limiter = Arc::new(RateLimiter::new("tiny", vec![WindowSpec::per_minute(1)]));
        let breaker = Arc::new(CircuitBreaker::new("tiny", CircuitBreakerConfig::default()));
        let caller = ProtectedCaller::new(Scripted::new(vec![]), pool, limiter, breaker);

        caller.call("a").unwrap();
        let err = caller.call("b").unwrap_err();
        match err {
            GuardError::RateLimitExceeded { scope, retry_after } => {
                assert_eq!(scope, "tiny");
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exhausted_pool_is_fatal() {
        let caller = caller(vec![
            Err(DownstreamError::leaked("a")),
            Err(DownstreamError::leaked("b")),
            Err(DownstreamError::leaked("c")),
        ]);
        for _ in 0..3 {
            caller.call("x").unwrap_err();
        }
        let err = caller.call("x").unwrap_err();
        assert!(matches!(err, GuardError::CredentialExhausted(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retry_after_rotation_succeeds() {
        let caller = caller(vec![Err(DownstreamError::quota("429"))]).with_retry(RetryPolicy::default());

        assert_eq!(caller.call_with_retry("x").unwrap(), "echo:x");
        assert_eq!(*caller.downstream().seen.lock(), vec!["key-a", "key-b"]);
    }

    #[test]
    fn test_retry_stops_on_fatal() {
        let caller = caller(vec![Err(DownstreamError::fatal("400"))]).with_retry(RetryPolicy::default());

        let err = caller.call_with_retry("x").unwrap_err();
        assert_eq!(err.failure_kind(), Some(ErrorKind::Fatal));
        assert_eq!(caller.downstream().seen.lock().len(), 1);
    }

    #[test]
    fn test_retry_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let caller = caller(vec![
            Err(DownstreamError::transient("503")),
            Err(DownstreamError::transient("503")),
            Err(DownstreamError::transient("503")),
        ])
        .with_retry(policy);

        caller.call_with_retry("x").unwrap_err();
        assert_eq!(caller.downstream().seen.lock().len(), 2);
    }

    #[test]
    fn test_open_breaker_skips_downstream() {
        let caller = caller(vec![
            Err(DownstreamError::transient("1")),
            Err(DownstreamError::transient("2")),
            Err(DownstreamError::transient("3")),
        ]);
        for _ in 0..3 {
            caller.call("x").unwrap_err();
        }
        assert_eq!(caller.breaker.state(), CircuitState::Open);

        let err = caller.call("x").unwrap_err();
        assert!(matches!(err, GuardError::CircuitOpen(_)));
        assert_eq!(caller.downstream().seen.lock().len(), 3);
        assert_eq!(caller.pool.current_index(), 0);
    }

    #[test]
    fn test_quota_tracker_sees_successes_and_quota_errors() {
        let tracker = Arc::new(QuotaTracker::new("test", Some(1500)));
        let caller = caller(vec![
            Err(DownstreamError::quota("429 quota exceeded")),
            Err(DownstreamError::transient("503")),
        ])
        .with_quota_tracker(Arc::clone(&tracker));

        caller.call("a").unwrap_err();
        caller.call("b").unwrap_err();
        caller.call("c").unwrap();

        let stats = tracker.stats();
        assert_eq!(stats.total_quota_errors, 1);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.last_error.as_deref(), Some("429 quota exceeded"));
    }

    #[test]
    fn test_non_credential_errors_leave_pool_alone() {
        let caller = caller(vec![
            Err(DownstreamError::transient("503")),
            Err(DownstreamError::fatal("400")),
            Err(DownstreamError::unknown("?")),
        ]);
        for _ in 0..3 {
            caller.call("x").unwrap_err();
        }
        assert_eq!(caller.pool.current_index(), 0);
        assert_eq!(caller.pool.revoked_count(), 0);
    }
}
