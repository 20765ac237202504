//! Resilience control plane for quota-limited, occasionally failing APIs.
//!
//! A rotating credential pool, multi-tier sliding-window rate limiters and
//! three-state circuit breakers, composed with a TTL result cache into one
//! protected-call path ([`guard::ProtectedCaller`]).

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;

pub use cache::TtlCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use credentials::{Credential, CredentialPool};
pub use error::{DownstreamError, ErrorKind, GuardError, GuardResult};
pub use guard::{ControlPlane, Downstream, ProtectedCaller};
pub use lifecycle::Shutdown;
pub use registry::Registry;
pub use resilience::{CircuitBreaker, CircuitState, RateLimiter};
