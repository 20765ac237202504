//! Quota pressure tracking.
//!
//! Counts successful downstream calls against the scope's daily quota and
//! remembers recent quota errors reported by the remote side. A scope is
//! considered exhausted when daily usage crosses a threshold or when quota
//! errors arrive in a burst.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{self, Clock};
use crate::observability::metrics;

/// How many recent quota errors are remembered.
const RECENT_ERRORS_CAP: usize = 100;
/// Span over which quota errors count as a burst.
const ERROR_BURST_WINDOW: Duration = Duration::from_secs(60);
/// Quota errors within the burst window that mark the scope exhausted.
const ERROR_BURST_LIMIT: usize = 5;
const DAY: Duration = Duration::from_secs(86_400);

/// Daily usage ratio at which a scope is reported exhausted.
pub const DEFAULT_EXHAUSTION_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStats {
    pub name: String,
    pub requests_per_day: Option<u32>,
    pub day_count: u64,
    pub total_requests: u64,
    pub total_quota_errors: u64,
    /// Quota errors within the last minute.
    pub recent_errors: usize,
    pub last_error: Option<String>,
    pub last_error_secs_ago: Option<f64>,
    pub exhausted: bool,
}

#[derive(Debug)]
struct QuotaError {
    at: Instant,
    message: String,
}

#[derive(Debug)]
struct QuotaState {
    day_started: Instant,
    day_count: u64,
    total_requests: u64,
    total_quota_errors: u64,
    recent: VecDeque<QuotaError>,
}

impl QuotaState {
    fn roll_day(&mut self, now: Instant) {
        if now.saturating_duration_since(self.day_started) > DAY {
            self.day_started = now;
            self.day_count = 0;
        }
    }

    fn recent_errors(&self, now: Instant) -> usize {
        self.recent
            .iter()
            .filter(|e| now.saturating_duration_since(e.at) < ERROR_BURST_WINDOW)
            .count()
    }

    fn exhausted(&self, requests_per_day: Option<u32>, threshold: f64, now: Instant) -> bool {
        let over_daily = requests_per_day
            .filter(|limit| *limit > 0)
            .is_some_and(|limit| self.day_count as f64 / limit as f64 >= threshold);
        over_daily || self.recent_errors(now) >= ERROR_BURST_LIMIT
    }
}

/// Per-scope record of daily usage and remote quota errors.
#[derive(Debug)]
pub struct QuotaTracker {
    name: String,
    requests_per_day: Option<u32>,
    state: Mutex<QuotaState>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(name: impl Into<String>, requests_per_day: Option<u32>) -> Self {
        Self::with_clock(name, requests_per_day, clock::system())
    }

    pub fn with_clock(name: impl Into<String>, requests_per_day: Option<u32>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            requests_per_day,
            state: Mutex::new(QuotaState {
                day_started: now,
                day_count: 0,
                total_requests: 0,
                total_quota_errors: 0,
                recent: VecDeque::new(),
            }),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.roll_day(self.clock.now());
        state.total_requests += 1;
        state.day_count += 1;
    }

    pub fn record_quota_error(&self, message: &str) {
        let mut state = self.state.lock();
        state.total_quota_errors += 1;
        if state.recent.len() == RECENT_ERRORS_CAP {
            state.recent.pop_front();
        }
        state.recent.push_back(QuotaError {
            at: self.clock.now(),
            message: message.to_string(),
        });
        metrics::record_quota_error(&self.name);
        tracing::warn!(
            scope = %self.name,
            count = state.total_quota_errors,
            error = message,
            "Quota error recorded"
        );
    }

    /// Daily usage at or above `threshold`, or a burst of recent quota errors.
    pub fn is_exhausted(&self, threshold: f64) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.roll_day(now);
        state.exhausted(self.requests_per_day, threshold, now)
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.day_started = self.clock.now();
        state.day_count = 0;
        state.total_requests = 0;
        state.total_quota_errors = 0;
        state.recent.clear();
        tracing::info!(scope = %self.name, "Quota tracker reset");
    }

    pub fn stats(&self) -> QuotaStats {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.roll_day(now);
        let last = state.recent.back();
        QuotaStats {
            name: self.name.clone(),
            requests_per_day: self.requests_per_day,
            day_count: state.day_count,
            total_requests: state.total_requests,
            total_quota_errors: state.total_quota_errors,
            recent_errors: state.recent_errors(now),
            last_error: last.map(|e| e.message.clone()),
            last_error_secs_ago: last.map(|e| now.saturating_duration_since(e.at).as_secs_f64()),
            exhausted: state.exhausted(self.requests_per_day, DEFAULT_EXHAUSTION_THRESHOLD, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker(per_day: Option<u32>) -> (QuotaTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (QuotaTracker::with_clock("gemini", per_day, clock.clone()), clock)
    }

    #[test]
    fn test_daily_usage_threshold() {
        let (tracker, _clock) = tracker(Some(10));
        for _ in 0..8 {
            tracker.record_success();
        }
        assert!(!tracker.is_exhausted(0.9));
        tracker.record_success();
        assert!(tracker.is_exhausted(0.9));
        assert!(tracker.stats().exhausted);
    }

    #[test]
    fn test_day_counter_rolls_over() {
        let (tracker, clock) = tracker(Some(2));
        tracker.record_success();
        tracker.record_success();
        assert!(tracker.is_exhausted(0.9));

        clock.advance(DAY + Duration::from_secs(1));
        assert!(!tracker.is_exhausted(0.9));
        let stats = tracker.stats();
        assert_eq!(stats.day_count, 0);
        assert_eq!(stats.total_requests, 2);
    }

    #[test]
    fn test_error_burst_marks_exhausted() {
        let (tracker, clock) = tracker(None);
        for i in 0..4 {
            tracker.record_quota_error(&format!("429 #{i}"));
        }
        assert!(!tracker.is_exhausted(0.9));

        tracker.record_quota_error("429 #4");
        assert!(tracker.is_exhausted(0.9));

        clock.advance(Duration::from_secs(60));
        assert!(!tracker.is_exhausted(0.9));

        let stats = tracker.stats();
        assert_eq!(stats.total_quota_errors, 5);
        assert_eq!(stats.recent_errors, 0);
        assert_eq!(stats.last_error.as_deref(), Some("429 #4"));
        assert_eq!(stats.last_error_secs_ago, Some(60.0));
    }

    #[test]
    fn test_recent_errors_are_bounded() {
        let (tracker, _clock) = tracker(None);
        for _ in 0..150 {
            tracker.record_quota_error("quota");
        }
        let stats = tracker.stats();
        assert_eq!(stats.total_quota_errors, 150);
        assert_eq!(stats.recent_errors, RECENT_ERRORS_CAP);
    }

    #[test]
    fn test_zero_daily_limit_is_unenforced() {
        let (tracker, _clock) = tracker(Some(0));
        tracker.record_success();
        assert!(!tracker.is_exhausted(0.0));
    }

    #[test]
    fn test_reset_clears_everything() {
        let (tracker, _clock) = tracker(Some(1));
        tracker.record_success();
        tracker.record_quota_error("quota");
        tracker.reset();

        let stats = tracker.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_quota_errors, 0);
        assert_eq!(stats.last_error, None);
        assert!(!stats.exhausted);
    }
}
