//! Protected-call path and the process-wide control plane.
//!
//! # Data Flow
//! ```text
//! caller.call(request)
//!     → cache (fast path on hit)
//!     → scope rate limiter (block up to the acquire timeout)
//!     → credential pool current()
//!     → scope circuit breaker → Downstream::call(credential, request)
//!     → success: cache.set
//!     → failure: pool.handle_error_for (rotate / revoke), error re-raised
//! ```
//!
//! # Design Decisions
//! - Each primitive keeps its own lock; the path takes them one after another
//! - Error classification comes from the adapter as an `ErrorKind`
//! - Retrying is opt-in via `call_with_retry` and bounded by `max_attempts`

mod caller;
mod control_plane;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::credentials::Credential;
use crate::error::DownstreamError;

pub use caller::ProtectedCaller;
pub use control_plane::{AlreadyInstalled, ControlPlane, ControlPlaneStats};

/// The remote operation being protected.
///
/// Implementations must be safe to call from many threads at once, and must
/// tag every failure with an [`ErrorKind`](crate::error::ErrorKind).
pub trait Downstream: Send + Sync {
    type Request: ?Sized;
    type Response: Serialize + DeserializeOwned;

    fn call(&self, credential: &Credential, request: &Self::Request) -> Result<Self::Response, DownstreamError>;

    /// Cache key for `request`; `None` bypasses the cache.
    fn cache_key(&self, _request: &Self::Request) -> Option<String> {
        None
    }
}
