//! Failure injection through the full protected-call path.

use std::sync::Arc;
use std::time::Duration;

use quota_guard::config::TierConfig;
use quota_guard::error::ErrorKind;
use quota_guard::{CircuitState, ControlPlane, GuardError, ManualClock};

mod common;
use common::Scripted;

fn plane(keys: &[&str]) -> (ControlPlane, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (ControlPlane::with_clock(common::config(keys), clock.clone()), clock)
}

#[test]
fn test_end_to_end_breaker_scenario() {
    let (plane, clock) = plane(&["key-a"]);
    let caller = plane.caller("llm", Scripted::new().fail(ErrorKind::Transient, 3));
    let breaker = plane.registry().breaker("llm");

    for _ in 0..3 {
        let err = caller.call("q").unwrap_err();
        assert_eq!(err.failure_kind(), Some(ErrorKind::Transient));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = caller.call("q").unwrap_err();
    assert!(matches!(err, GuardError::CircuitOpen(_)));
    assert_eq!(caller.downstream().calls(), 3);

    clock.advance(Duration::from_secs(5));
    assert_eq!(caller.call("q").unwrap(), "ok:q");
    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::HalfOpen);
    assert_eq!(stats.success_count, 1);

    assert_eq!(caller.call("q").unwrap(), "ok:q");
    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.circuit_opened_count, 1);
}

#[test]
fn test_half_open_failure_reopens() {
    let (plane, clock) = plane(&["key-a"]);
    let caller = plane.caller("llm", Scripted::new().fail(ErrorKind::Transient, 3));
    let breaker = plane.registry().breaker("llm");

    for _ in 0..3 {
        caller.call("q").unwrap_err();
    }
    clock.advance(Duration::from_secs(6));

    caller.call("q").unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    caller.downstream().push_failure(ErrorKind::Transient);
    caller.call("q").unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.stats().success_count, 0);

    let err = caller.call("q").unwrap_err();
    assert!(matches!(err, GuardError::CircuitOpen(_)));
}

#[test]
fn test_uncounted_errors_pass_through() {
    let mut config = common::config(&["key-a"]);
    config.circuit_breaker.counted_kinds = vec![ErrorKind::Transient];
    let plane = ControlPlane::new(config);
    let caller = plane.caller("llm", Scripted::new().fail(ErrorKind::Fatal, 5));

    for _ in 0..5 {
        let err = caller.call("q").unwrap_err();
        assert_eq!(err.failure_kind(), Some(ErrorKind::Fatal));
    }
    let stats = plane.registry().breaker("llm").stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(caller.downstream().calls(), 5);
}

#[test]
fn test_quota_rotates_and_retry_uses_next_credential() {
    let (plane, _clock) = plane(&["key-a", "key-b", "key-c"]);
    let caller = plane.caller("llm", Scripted::new().fail(ErrorKind::Quota, 1));

    assert_eq!(caller.call_with_retry("q").unwrap(), "ok:q");
    assert_eq!(caller.downstream().seen(), vec!["key-a", "key-b"]);
    assert_eq!(plane.pool().current_index(), 1);
}

#[test]
fn test_leaked_credential_never_reused() {
    let (plane, _clock) = plane(&["key-a", "key-b", "key-c"]);
    let caller = plane.caller("llm", Scripted::new().fail(ErrorKind::Leaked, 1));

    caller.call("q").unwrap_err();
    for _ in 0..6 {
        caller.call("q").unwrap();
        plane.pool().rotate();
    }

    let seen = caller.downstream().seen();
    assert_eq!(seen[0], "key-a");
    assert!(seen[1..].iter().all(|k| k != "key-a"));
    assert!(!plane.pool().add("key-a"));
    assert_eq!(plane.pool().stats().revoked, 1);
}

#[test]
fn test_exhaustion_requires_operator() {
    let (plane, _clock) = plane(&["only"]);
    let caller = plane.caller("llm", Scripted::new().fail(ErrorKind::Leaked, 1));

    caller.call_with_retry("q").unwrap_err();
    let err = caller.call_with_retry("q").unwrap_err();
    assert!(matches!(err, GuardError::CredentialExhausted(_)));
    assert_eq!(caller.downstream().calls(), 1);
}

#[test]
fn test_rate_limit_signal_then_rollover() {
    let mut config = common::config(&["key-a"]);
    config.rate_limit.scopes.insert(
        "tight".into(),
        TierConfig {
            requests_per_minute: Some(2),
            ..TierConfig::default()
        },
    );
    let clock = Arc::new(ManualClock::new());
    let plane = ControlPlane::with_clock(config, clock.clone());
    let caller = plane.caller("tight", Scripted::new());

    caller.call("1").unwrap();
    caller.call("2").unwrap();
    match caller.call("3").unwrap_err() {
        GuardError::RateLimitExceeded { scope, retry_after } => {
            assert_eq!(scope, "tight");
            assert_eq!(retry_after, Duration::from_secs(60));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(caller.downstream().calls(), 2);

    clock.advance(Duration::from_secs(61));
    assert_eq!(caller.call("4").unwrap(), "ok:4");
}

#[test]
fn test_cache_hit_skips_limiter_and_downstream() {
    let (plane, clock) = plane(&["key-a"]);
    let caller = plane.caller("llm", Scripted::new().cacheable());

    caller.call("same").unwrap();
    caller.call("same").unwrap();
    assert_eq!(caller.downstream().calls(), 1);
    assert_eq!(plane.registry().limiter("llm").stats().total_requests, 1);

    clock.advance(Duration::from_secs(1801));
    caller.call("same").unwrap();
    assert_eq!(caller.downstream().calls(), 2);
}
