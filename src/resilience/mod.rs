//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → rate_limit.rs (acquire a slot in every window)
//!     → circuit_breaker.rs (fail fast when open, count failures)
//!     → quota.rs (daily usage and remote quota errors, for reporting)
//!     → On failure: retries.rs (decide whether the orchestrator tries again)
//! ```
//!
//! # Design Decisions
//! - Each primitive owns its own lock; none is shared across primitives
//! - Primitives observe and re-raise errors, never swallow them
//! - Retry lives in the orchestrator, never inside a primitive

pub mod circuit_breaker;
pub mod quota;
pub mod rate_limit;
pub mod retries;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use quota::{QuotaStats, QuotaTracker};
pub use rate_limit::{RateLimiter, RateLimiterStats, WindowSpec};
pub use retries::{RetryDecision, RetryPolicy};
