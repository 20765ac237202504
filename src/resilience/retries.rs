//! Bounded retry for the protected-call orchestrator.
//!
//! # Responsibilities
//! - Decide whether a failed attempt is worth repeating
//! - Compute exponential backoff with jitter between transient failures
//!
//! # Design Decisions
//! - The primitives never retry; only the orchestrator loops, and only
//!   up to `max_attempts`
//! - Quota/leaked errors retry immediately, but only if the pool actually
//!   switched credentials
//! - Fatal, circuit-open, rate-limit and exhaustion errors stop at once
//! - Jitter (0-10% of the delay) spreads out synchronized retries

use std::time::Duration;

use rand::Rng;

use crate::error::{ErrorKind, GuardError};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again straight away (credential changed).
    RetryNow,
    /// Try again after sleeping.
    RetryAfter(Duration),
    /// Give up and surface the error.
    Stop,
}

/// Attempt budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2u64.saturating_pow(attempt - 1))
            .min(max_ms);

        let jitter_range = delay_ms / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter)
    }

    /// Decide after `attempt` attempts (1-based) have failed with `error`.
    ///
    /// `rotated` reports whether the credential pool switched credentials.
    pub fn decide(&self, attempt: u32, error: &GuardError, rotated: bool) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Stop;
        }
        match error.failure_kind() {
            Some(ErrorKind::Quota | ErrorKind::Leaked) if rotated => RetryDecision::RetryNow,
            Some(ErrorKind::Transient | ErrorKind::Unknown) => RetryDecision::RetryAfter(self.backoff(attempt)),
            _ => RetryDecision::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CircuitOpenError, DownstreamError};

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert!(policy.backoff(1) >= Duration::from_millis(100));
        assert!(policy.backoff(2) >= Duration::from_millis(200));

        let capped = policy.backoff(10);
        assert!(capped >= Duration::from_millis(2000));
        assert!(capped < Duration::from_millis(2200));
    }

    #[test]
    fn test_decisions() {
        let policy = RetryPolicy::default();
        let quota = GuardError::from(DownstreamError::quota("429"));
        let transient = GuardError::from(DownstreamError::transient("503"));
        let fatal = GuardError::from(DownstreamError::fatal("400"));
        let open = GuardError::from(CircuitOpenError {
            name: "x".into(),
            retry_after: Duration::from_secs(1),
            half_open: false,
        });

        assert_eq!(policy.decide(1, &quota, true), RetryDecision::RetryNow);
        assert_eq!(policy.decide(1, &quota, false), RetryDecision::Stop);
        assert!(matches!(policy.decide(1, &transient, false), RetryDecision::RetryAfter(_)));
        assert_eq!(policy.decide(1, &fatal, false), RetryDecision::Stop);
        assert_eq!(policy.decide(1, &open, false), RetryDecision::Stop);
        assert_eq!(policy.decide(3, &transient, false), RetryDecision::Stop);
    }

    #[test]
    fn test_none_never_retries() {
        let transient = GuardError::from(DownstreamError::transient("reset"));
        assert_eq!(RetryPolicy::none().decide(1, &transient, false), RetryDecision::Stop);
    }
}
