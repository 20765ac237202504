//! Credential rotation subsystem.
//!
//! # Data Flow
//! ```text
//! config (inline keys + numbered env entries)
//!     → pool.rs (ordered, de-duplicated, current index)
//!     → orchestrator asks for current()
//!     → downstream error tagged Quota  → rotate()
//!     → downstream error tagged Leaked → mark_compromised(current) + rotate()
//! ```
//!
//! # Design Decisions
//! - One lock per pool; current() never observes a half-done rotation
//! - Revocation is permanent for the life of the process
//! - Rotating a single-credential pool is a no-op, not an error

pub mod pool;

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

pub use pool::{CredentialPool, CredentialPoolStats};

/// An opaque API credential.
///
/// `Debug`, `Display` and `Serialize` only ever show a short preview.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::from(secret.into()))
    }

    /// The raw secret, for handing to the transport.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First 8 characters followed by an ellipsis.
    pub fn preview(&self) -> String {
        let head: String = self.0.chars().take(8).collect();
        format!("{head}...")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.preview()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.preview())
    }
}

impl Serialize for Credential {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.preview())
    }
}
