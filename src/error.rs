//! Error taxonomy for the protected-call path.
//!
//! # Categories
//! - `RateLimitExceeded`: back off and try again shortly
//! - `CircuitOpen`: service degraded, serve a fallback, do not spin
//! - `CredentialExhausted`: every credential revoked, needs an operator
//! - `Downstream`: the remote call itself failed, tagged by the adapter
//!
//! # Design Decisions
//! - Classification is structured ([`ErrorKind`]), produced by the adapter
//! - None of the primitives swallow errors; they observe and re-raise

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a downstream failure, assigned by the call adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Quota exhausted or rate limited by the remote side.
    Quota,
    /// Credential reported as leaked or compromised.
    Leaked,
    /// Temporary failure (timeouts, 5xx, connection resets).
    Transient,
    /// Will not succeed on retry (bad request, auth misconfiguration).
    Fatal,
    /// Adapter could not tell.
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Quota,
        ErrorKind::Leaked,
        ErrorKind::Transient,
        ErrorKind::Fatal,
        ErrorKind::Unknown,
    ];

    /// Whether this kind should make the credential pool rotate or revoke.
    pub fn affects_credentials(self) -> bool {
        matches!(self, ErrorKind::Quota | ErrorKind::Leaked)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Quota => "quota",
            ErrorKind::Leaked => "leaked",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Failure reported by a downstream call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} downstream error: {message}")]
pub struct DownstreamError {
    pub kind: ErrorKind,
    pub message: String,
    /// Transport status code when the adapter has one.
    pub status: Option<u16>,
}

impl DownstreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, message)
    }

    pub fn leaked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Leaked, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Classify by HTTP status for adapters that speak HTTP.
    ///
    /// 429 is quota, 408 and 5xx are transient, other 4xx are fatal.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => ErrorKind::Quota,
            408 | 500..=599 => ErrorKind::Transient,
            400..=499 => ErrorKind::Fatal,
            _ => ErrorKind::Unknown,
        };
        Self {
            kind,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Call rejected because the breaker is open (or probing at capacity).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.describe())]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_after: Duration,
    /// True when rejected because the half-open probe quota is taken.
    pub half_open: bool,
}

impl CircuitOpenError {
    fn describe(&self) -> String {
        if self.half_open {
            format!(
                "circuit breaker '{}' is half-open and testing recovery; retry shortly",
                self.name
            )
        } else {
            format!(
                "circuit breaker '{}' is open; retry in {:.0}s",
                self.name,
                self.retry_after.as_secs_f64()
            )
        }
    }
}

/// Every credential in the pool has been revoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no usable credentials remain ({revoked} revoked)")]
pub struct CredentialExhaustedError {
    pub revoked: usize,
}

/// Errors surfaced by the protected-call orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// No rate-limit slot within the acquire timeout.
    #[error("rate limit exceeded for scope '{scope}'; retry in {:.1}s", .retry_after.as_secs_f64())]
    RateLimitExceeded { scope: String, retry_after: Duration },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    CredentialExhausted(#[from] CredentialExhaustedError),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),
}

impl GuardError {
    /// Downstream failure category, if this error came from the downstream call.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            GuardError::Downstream(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Whether the orchestrator may try again with the same or another credential.
    pub fn is_retryable(&self) -> bool {
        match self {
            GuardError::Downstream(e) => e.kind != ErrorKind::Fatal,
            _ => false,
        }
    }
}

/// Lets the circuit breaker tell downstream failures from pass-through errors.
pub trait FailureKind {
    /// `None` means "not a downstream failure": never counted by the breaker.
    fn failure_kind(&self) -> Option<ErrorKind>;
}

impl FailureKind for DownstreamError {
    fn failure_kind(&self) -> Option<ErrorKind> {
        Some(self.kind)
    }
}

impl FailureKind for GuardError {
    fn failure_kind(&self) -> Option<ErrorKind> {
        GuardError::failure_kind(self)
    }
}

/// Result alias for the orchestrator.
pub type GuardResult<T> = Result<T, GuardError>;
