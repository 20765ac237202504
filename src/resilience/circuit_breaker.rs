//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: a limited number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive counted failures >= failure_threshold
//! Open → Half-Open:   first state query after `timeout` since last failure
//! Half-Open → Closed: half_open_max_calls probe successes
//! Half-Open → Open:   any counted probe failure
//! ```
//!
//! # Design Decisions
//! - The Open → Half-Open check is lazy; there is no timer thread
//! - One lock per breaker guards every read and transition
//! - The downstream call itself runs outside the lock
//! - Errors outside the counted predicate pass through untouched
//! - Outcomes of calls admitted before a transition do not move the new state

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{self, Clock};
use crate::error::{CircuitOpenError, ErrorKind, FailureKind};
use crate::observability::metrics;

/// Runtime state of a breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds and timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }
}

/// Decides whether a downstream failure counts toward the breaker.
pub type FailurePredicate = Arc<dyn Fn(ErrorKind) -> bool + Send + Sync>;

/// Snapshot of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_calls: u32,
    pub circuit_opened_count: u64,
    pub time_until_reset_secs: f64,
    pub success_rate: f64,
}

/// Ticket for an admitted call, tying its outcome to the episode it started in.
#[derive(Debug, Clone, Copy)]
struct Admission {
    generation: u64,
    probe: bool,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
    /// Bumped on every transition.
    generation: u64,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
    opened_count: u64,
}

impl BreakerState {
    fn current(&self) -> CircuitState {
        self.state
    }

    fn time_until_reset(&self, timeout: Duration, now: Instant) -> Duration {
        match (self.current(), self.last_failure) {
            (CircuitState::Open, Some(at)) => timeout.saturating_sub(now.saturating_duration_since(at)),
            _ => Duration::ZERO,
        }
    }
}

/// Three-state circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    counts: FailurePredicate,
    inner: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.inner.lock().current())
            .finish()
    }
}

impl CircuitBreaker {
    /// A breaker that counts every downstream failure kind.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            timeout_secs = config.timeout.as_secs_f64(),
            half_open_max_calls = config.half_open_max_calls,
            "Circuit breaker initialized"
        );
        Self {
            name,
            config,
            counts: Arc::new(|_| true),
            inner: Mutex::new(BreakerState::default()),
            clock: clock::system(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Restrict which failure kinds count toward opening the circuit.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(ErrorKind) -> bool + Send + Sync + 'static,
    {
        self.counts = Arc::new(predicate);
        self
    }

    /// Count only the listed kinds.
    pub fn counting(self, kinds: Vec<ErrorKind>) -> Self {
        self.with_predicate(move |kind| kinds.contains(&kind))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` through the breaker.
    ///
    /// Rejected calls never reach `f`. Failures are returned unchanged.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: FailureKind + From<CircuitOpenError>,
    {
        let admission = self.admit()?;

        match f() {
            Ok(value) => {
                self.on_success(admission);
                Ok(value)
            }
            Err(err) => {
                match err.failure_kind() {
                    Some(kind) if (self.counts)(kind) => self.on_failure(admission, kind),
                    other => self.on_uncounted(admission, other),
                }
                Err(err)
            }
        }
    }

    /// Current state, applying the lazy Open → Half-Open check.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, self.clock.now());
        inner.current()
    }

    /// Seconds until an open circuit starts probing; zero otherwise.
    pub fn time_until_reset(&self) -> Duration {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);
        inner.time_until_reset(self.config.timeout, now)
    }

    /// Force Closed and zero every counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation + 1;
        *inner = BreakerState {
            generation,
            ..BreakerState::default()
        };
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
        metrics::record_circuit_state(&self.name, CircuitState::Closed);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);
        let success_rate = if inner.total_calls > 0 {
            inner.total_successes as f64 / inner.total_calls as f64 * 100.0
        } else {
            0.0
        };
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.current(),
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_calls: inner.half_open_calls,
            circuit_opened_count: inner.opened_count,
            time_until_reset_secs: inner.time_until_reset(self.config.timeout, now).as_secs_f64(),
            success_rate,
        }
    }

    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        inner.total_calls += 1;
        self.refresh(&mut inner, now);

        match inner.current() {
            CircuitState::Closed => Ok(Admission {
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => {
                inner.rejected_calls += 1;
                let retry_after = inner.time_until_reset(self.config.timeout, now);
                tracing::warn!(
                    breaker = %self.name,
                    retry_in_secs = retry_after.as_secs_f64(),
                    "Request rejected - circuit is open"
                );
                Err(CircuitOpenError {
                    name: self.name.clone(),
                    retry_after,
                    half_open: false,
                })
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    inner.rejected_calls += 1;
                    tracing::warn!(
                        breaker = %self.name,
                        half_open_calls = inner.half_open_calls,
                        max = self.config.half_open_max_calls,
                        "Request rejected - half-open probe limit reached"
                    );
                    return Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                        half_open: true,
                    });
                }
                inner.half_open_calls += 1;
                Ok(Admission {
                    generation: inner.generation,
                    probe: true,
                })
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        if admission.generation != inner.generation {
            return;
        }

        match inner.current() {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                tracing::info!(
                    breaker = %self.name,
                    successes = inner.success_count,
                    required = self.config.half_open_max_calls,
                    "Half-open probe succeeded"
                );
                if inner.success_count >= self.config.half_open_max_calls {
                    self.close(&mut inner);
                }
            }
            CircuitState::Closed => {
                if inner.failure_count > 0 {
                    tracing::debug!(
                        breaker = %self.name,
                        was = inner.failure_count,
                        "Success - resetting failure count"
                    );
                    inner.failure_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, admission: Admission, kind: ErrorKind) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        inner.total_failures += 1;
        if admission.generation != inner.generation {
            return;
        }
        inner.last_failure = Some(now);

        match inner.current() {
            CircuitState::HalfOpen => {
                tracing::error!(breaker = %self.name, %kind, "Recovery probe failed - reopening circuit");
                self.trip(&mut inner, now);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                tracing::warn!(
                    breaker = %self.name,
                    %kind,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Counted failure"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.trip(&mut inner, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_uncounted(&self, admission: Admission, kind: Option<ErrorKind>) {
        tracing::warn!(breaker = %self.name, kind = ?kind, "Error passed through without being counted");
        if !admission.probe {
            return;
        }
        let mut inner = self.inner.lock();
        if admission.generation == inner.generation && inner.current() == CircuitState::HalfOpen {
            // Give the probe slot back.
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
    }

    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        if inner.current() != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .last_failure
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        if elapsed >= self.config.timeout {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_calls = 0;
            inner.success_count = 0;
            inner.generation += 1;
            tracing::info!(breaker = %self.name, "Circuit half-open (testing recovery)");
            metrics::record_circuit_state(&self.name, CircuitState::HalfOpen);
        }
    }

    fn trip(&self, inner: &mut BreakerState, now: Instant) {
        inner.state = CircuitState::Open;
        inner.last_failure = Some(now);
        inner.success_count = 0;
        inner.half_open_calls = 0;
        inner.opened_count += 1;
        inner.generation += 1;
        tracing::error!(
            breaker = %self.name,
            failures = inner.failure_count,
            threshold = self.config.failure_threshold,
            retry_in_secs = self.config.timeout.as_secs_f64(),
            "Circuit open"
        );
        metrics::record_circuit_opened(&self.name);
        metrics::record_circuit_state(&self.name, CircuitState::Open);
    }

    fn close(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_calls = 0;
        inner.generation += 1;
        tracing::info!(breaker = %self.name, "Circuit closed (recovered)");
        metrics::record_circuit_state(&self.name, CircuitState::Closed);
    }
}
