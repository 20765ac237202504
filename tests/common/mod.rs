//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use quota_guard::config::GuardConfig;
use quota_guard::error::ErrorKind;
use quota_guard::{Credential, Downstream, DownstreamError};

/// Downstream that replays scripted outcomes, then succeeds with `ok:<request>`.
pub struct Scripted {
    outcomes: Mutex<VecDeque<Result<String, DownstreamError>>>,
    seen: Mutex<Vec<String>>,
    calls: AtomicUsize,
    cacheable: bool,
}

impl Scripted {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            cacheable: false,
        }
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Queue `n` failures of `kind`.
    pub fn fail(self, kind: ErrorKind, n: usize) -> Self {
        {
            let mut outcomes = self.outcomes.lock();
            for i in 0..n {
                outcomes.push_back(Err(DownstreamError::new(kind, format!("scripted {kind} #{i}"))));
            }
        }
        self
    }

    pub fn push_failure(&self, kind: ErrorKind) {
        self.outcomes
            .lock()
            .push_back(Err(DownstreamError::new(kind, format!("scripted {kind}"))));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw credentials used, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl Downstream for Scripted {
    type Request = str;
    type Response = String;

    fn call(&self, credential: &Credential, request: &str) -> Result<String, DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(credential.expose().to_string());
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("ok:{request}")))
    }

    fn cache_key(&self, request: &str) -> Option<String> {
        self.cacheable.then(|| request.to_string())
    }
}

/// Valid config with the given keys, the `3 / 5s / 2` breaker, no blocking
/// admission and no environment lookups.
pub fn config(keys: &[&str]) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.credentials.keys = keys.iter().map(|k| k.to_string()).collect();
    config.credentials.env_prefix = None;
    config.rate_limit.requests_per_minute = Some(1000);
    config.rate_limit.requests_per_day = None;
    config.rate_limit.acquire_timeout_secs = 0.0;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.timeout_secs = 5;
    config.circuit_breaker.half_open_max_calls = 2;
    config.observability.metrics_enabled = false;
    config
}
