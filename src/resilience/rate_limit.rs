//! Multi-tier sliding-window rate limiter.
//!
//! # Algorithm
//! Each window keeps the admission instants of the last `duration`, oldest
//! first. A request is admitted only if every window still has room after
//! pruning; admission appends `now` to every window.
//!
//! ```text
//! minute: [t0 t1 t2 t3 t4]  limit 5  → full, reject
//! hour:   [.. 37 entries ..] limit 1000
//! day:    [.. 412 entries ..] limit 1500
//! ```
//!
//! # Design Decisions
//! - Window-exact (closed sliding window), not fixed buckets
//! - One lock per limiter; prune + check + append is a single critical section
//! - Blocking acquire waits on a condvar with a deadline derived from the
//!   binding window, never holding the lock while asleep
//! - Admission is not FIFO-fair across waiting threads

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::clock::{self, Clock};
use crate::observability::metrics;

/// Shortest wait between admission attempts in [`RateLimiter::acquire`].
const MIN_WAIT: Duration = Duration::from_millis(1);
/// Longest single wait; bounds how stale a waiter's view of the clock gets.
const MAX_WAIT: Duration = Duration::from_millis(250);

/// A named limit over a rolling duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub name: String,
    pub duration: Duration,
    pub limit: u32,
}

impl WindowSpec {
    pub fn new(name: impl Into<String>, duration: Duration, limit: u32) -> Self {
        Self {
            name: name.into(),
            duration,
            limit,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new("minute", Duration::from_secs(60), limit)
    }

    pub fn per_hour(limit: u32) -> Self {
        Self::new("hour", Duration::from_secs(3_600), limit)
    }

    pub fn per_day(limit: u32) -> Self {
        Self::new("day", Duration::from_secs(86_400), limit)
    }
}

/// Occupancy of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub name: String,
    pub duration_secs: f64,
    pub limit: u32,
    pub count: usize,
}

/// Snapshot of a limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub windows: Vec<WindowStats>,
    pub total_requests: u64,
    pub total_blocked: u64,
    pub time_until_available_secs: f64,
}

#[derive(Debug)]
struct Window {
    spec: WindowSpec,
    hits: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) > self.spec.duration {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_full(&self) -> bool {
        self.hits.len() >= self.spec.limit as usize
    }

    /// Time until the oldest entry ages out, if the window is full.
    fn wait(&self, now: Instant) -> Duration {
        match self.hits.front() {
            Some(&oldest) if self.is_full() => self
                .spec
                .duration
                .saturating_sub(now.saturating_duration_since(oldest)),
            _ => Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    windows: Vec<Window>,
    total_requests: u64,
    total_blocked: u64,
}

impl LimiterState {
    fn prune(&mut self, now: Instant) {
        for window in &mut self.windows {
            window.prune(now);
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.windows.iter().any(Window::is_full) {
            return false;
        }
        for window in &mut self.windows {
            window.hits.push_back(now);
        }
        self.total_requests += 1;
        true
    }

    /// Wait imposed by the binding (fullest) window. Call after `prune`.
    fn wait(&self, now: Instant) -> Duration {
        self.windows
            .iter()
            .map(|w| w.wait(now))
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// Sliding-window admission controller for one scope.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    state: Mutex<LimiterState>,
    freed: Condvar,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, windows: Vec<WindowSpec>) -> Self {
        Self::with_clock(name, windows, clock::system())
    }

    pub fn with_clock(name: impl Into<String>, windows: Vec<WindowSpec>, clock: Arc<dyn Clock>) -> Self {
        let name = name.into();
        tracing::info!(
            limiter = %name,
            windows = ?windows.iter().map(|w| format!("{}={}", w.name, w.limit)).collect::<Vec<_>>(),
            "Rate limiter initialized"
        );
        Self {
            name,
            state: Mutex::new(LimiterState {
                windows: windows
                    .into_iter()
                    .map(|spec| Window {
                        spec,
                        hits: VecDeque::new(),
                    })
                    .collect(),
                total_requests: 0,
                total_blocked: 0,
            }),
            freed: Condvar::new(),
            clock,
        }
    }

    /// Minute/hour/day tiers; only tiers with a limit are enforced.
    pub fn tiered(
        name: impl Into<String>,
        per_minute: Option<u32>,
        per_hour: Option<u32>,
        per_day: Option<u32>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let windows = [
            per_minute.map(WindowSpec::per_minute),
            per_hour.map(WindowSpec::per_hour),
            per_day.map(WindowSpec::per_day),
        ]
        .into_iter()
        .flatten()
        .collect();
        Self::with_clock(name, windows, clock)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit now or refuse without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.admit(self.clock.now()) {
            return true;
        }
        state.total_blocked += 1;
        metrics::record_rate_limited(&self.name);
        false
    }

    /// Admit, waiting up to `timeout` (forever when `None` or too far out to
    /// represent).
    ///
    /// Returns `false` on timeout; never errors.
    pub fn acquire(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        let mut logged = false;

        loop {
            let now = self.clock.now();
            if state.admit(now) {
                return true;
            }

            let mut wait = state.wait(now).clamp(MIN_WAIT, MAX_WAIT);
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    state.total_blocked += 1;
                    metrics::record_rate_limited(&self.name);
                    tracing::warn!(limiter = %self.name, timeout = ?timeout, "Rate limit acquire timed out");
                    return false;
                }
                wait = wait.min(remaining);
            }

            if !logged {
                tracing::debug!(
                    limiter = %self.name,
                    wait_secs = state.wait(now).as_secs_f64(),
                    "Rate limit reached, waiting"
                );
                logged = true;
            }

            self.freed.wait_for(&mut state, wait);
        }
    }

    /// How long until a request would be admitted; zero if one would be now.
    pub fn time_until_available(&self) -> Duration {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.prune(now);
        state.wait(now)
    }

    /// Clear all windows and counters, waking any blocked acquirers.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for window in &mut state.windows {
            window.hits.clear();
        }
        state.total_requests = 0;
        state.total_blocked = 0;
        drop(state);
        self.freed.notify_all();
        tracing::info!(limiter = %self.name, "Rate limiter reset");
    }

    pub fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.prune(now);
        RateLimiterStats {
            name: self.name.clone(),
            windows: state
                .windows
                .iter()
                .map(|w| WindowStats {
                    name: w.spec.name.clone(),
                    duration_secs: w.spec.duration.as_secs_f64(),
                    limit: w.spec.limit,
                    count: w.hits.len(),
                })
                .collect(),
            total_requests: state.total_requests,
            total_blocked: state.total_blocked,
            time_until_available_secs: state.wait(now).as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(windows: Vec<WindowSpec>) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RateLimiter::with_clock("test", windows, clock.clone()), clock)
    }

    #[test]
    fn test_window_exactness() {
        let (limiter, clock) = limiter(vec![WindowSpec::per_minute(5)]);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let (limiter, clock) = limiter(vec![WindowSpec::per_minute(1)]);
        assert!(limiter.try_acquire());
        clock.advance(Duration::from_secs(60));
        assert!(!limiter.try_acquire());
        clock.advance(Duration::from_millis(1));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let (limiter, _clock) = limiter(vec![WindowSpec::per_minute(2), WindowSpec::per_hour(10)]);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());

        let stats = limiter.stats();
        assert_eq!(stats.windows[0].count, 2);
        assert_eq!(stats.windows[1].count, 2);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_blocked, 2);
    }

    #[test]
    fn test_all_tiers_must_permit() {
        let (limiter, clock) = limiter(vec![WindowSpec::per_minute(10), WindowSpec::per_hour(12)]);
        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        // Minute window has room, hour window is full.
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.stats().windows[0].count, 2);
    }

    #[test]
    fn test_time_until_available() {
        let (limiter, clock) = limiter(vec![WindowSpec::per_minute(2)]);
        assert_eq!(limiter.time_until_available(), Duration::ZERO);

        limiter.try_acquire();
        clock.advance(Duration::from_secs(10));
        limiter.try_acquire();
        assert_eq!(limiter.time_until_available(), Duration::from_secs(50));

        clock.advance(Duration::from_secs(20));
        assert_eq!(limiter.time_until_available(), Duration::from_secs(30));
    }

    #[test]
    fn test_binding_window_is_the_fullest() {
        let (limiter, clock) = limiter(vec![WindowSpec::per_minute(100), WindowSpec::per_hour(3)]);
        for _ in 0..3 {
            limiter.try_acquire();
            clock.advance(Duration::from_secs(1));
        }
        // Hour window is binding: its oldest entry is 3s old.
        assert_eq!(limiter.time_until_available(), Duration::from_secs(3_597));
    }

    #[test]
    fn test_tiered_skips_unset_tiers() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::tiered("gemini_api", Some(60), None, Some(1500), clock);
        let names: Vec<_> = limiter.stats().windows.into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["minute", "day"]);
    }

    #[test]
    fn test_acquire_times_out() {
        let (limiter, _clock) = limiter(vec![WindowSpec::per_minute(1)]);
        assert!(limiter.acquire(Some(Duration::from_millis(10))));

        let start = Instant::now();
        assert!(!limiter.acquire(Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_acquire_waits_for_rollover() {
        let limiter = RateLimiter::new("real", vec![WindowSpec::new("short", Duration::from_millis(100), 1)]);
        assert!(limiter.try_acquire());

        let start = Instant::now();
        assert!(limiter.acquire(Some(Duration::from_secs(2))));
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_acquire_with_unbounded_timeout() {
        let (limiter, _clock) = limiter(vec![WindowSpec::per_minute(1)]);
        assert!(limiter.acquire(Some(Duration::MAX)));

        let limiter = Arc::new(limiter);
        let waiter = {
            let limiter = limiter.clone();
            std::thread::spawn(move || limiter.acquire(Some(Duration::MAX)))
        };
        std::thread::sleep(Duration::from_millis(50));
        limiter.reset();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_reset_wakes_waiters() {
        let (limiter, _clock) = limiter(vec![WindowSpec::per_minute(1)]);
        let limiter = Arc::new(limiter);
        assert!(limiter.try_acquire());

        let waiter = {
            let limiter = limiter.clone();
            std::thread::spawn(move || limiter.acquire(Some(Duration::from_secs(5))))
        };
        std::thread::sleep(Duration::from_millis(50));
        limiter.reset();
        assert!(waiter.join().unwrap());
    }
}
