//! Result caching in front of the protected-call path.
//!
//! # Design Decisions
//! - Bounded: least-recently-used entry evicted when full
//! - Lazy expiry: an expired entry is absent on read; sweeping only reclaims memory
//! - Never errors; a miss is a normal outcome

pub mod ttl;

pub use ttl::{CacheStats, TtlCache};
