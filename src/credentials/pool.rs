//! Rotating credential pool.
//!
//! # Invariants
//! - `current_index < credentials.len()` whenever the pool is non-empty
//! - a revoked credential is never in `credentials` and never re-admitted
//! - rotation is `(current_index + 1) % len`, recomputed after removals

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::Serialize;

use crate::credentials::Credential;
use crate::error::{CredentialExhaustedError, ErrorKind, FailureKind};
use crate::observability::metrics;

/// Snapshot of pool state for the admin endpoint and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialPoolStats {
    pub available: usize,
    pub current_index: usize,
    pub revoked: usize,
    pub rotation_enabled: bool,
    pub rotations: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    credentials: Vec<Credential>,
    current_index: usize,
    revoked: HashSet<Credential>,
    rotations: u64,
}

impl PoolState {
    fn current(&self) -> Option<&Credential> {
        self.credentials.get(self.current_index)
    }

    fn rotate(&mut self) -> bool {
        let len = self.credentials.len();
        if len <= 1 {
            tracing::debug!(available = len, "Cannot rotate credential pool");
            return false;
        }
        let old = self.current_index;
        self.current_index = (self.current_index + 1) % len;
        self.rotations += 1;
        tracing::info!(
            from = old + 1,
            to = self.current_index + 1,
            of = len,
            "Rotated credential"
        );
        metrics::record_credential_rotation();
        true
    }

    fn revoke(&mut self, credential: &Credential) -> bool {
        let Some(pos) = self.credentials.iter().position(|c| c == credential) else {
            return false;
        };
        let removed = self.credentials.remove(pos);
        self.revoked.insert(removed);

        let len = self.credentials.len();
        if pos < self.current_index {
            // Keep pointing at the same credential.
            self.current_index -= 1;
        } else if self.current_index >= len {
            self.current_index = 0;
        }

        tracing::error!(
            credential = %credential,
            remaining = len,
            revoked = self.revoked.len(),
            "Credential flagged as compromised; removed from pool"
        );
        metrics::record_credential_revoked();
        true
    }
}

/// Thread-safe pool of interchangeable credentials.
#[derive(Debug)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool, dropping duplicates while keeping first-seen order.
    pub fn new<I, C>(credentials: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Credential>,
    {
        let mut seen = HashSet::new();
        let credentials: Vec<Credential> = credentials
            .into_iter()
            .map(Into::<Credential>::into)
            .filter(|c: &Credential| !c.expose().is_empty() && seen.insert(c.clone()))
            .collect();

        if credentials.is_empty() {
            tracing::warn!("Credential pool initialized without credentials");
        } else {
            tracing::info!(count = credentials.len(), "Credential pool initialized");
        }

        Self {
            state: Mutex::new(PoolState {
                credentials,
                ..PoolState::default()
            }),
        }
    }

    /// The credential to use for the next call.
    pub fn current(&self) -> Result<Credential, CredentialExhaustedError> {
        let state = self.state.lock();
        state.current().cloned().ok_or(CredentialExhaustedError {
            revoked: state.revoked.len(),
        })
    }

    /// Credential at a specific position, if any.
    pub fn get(&self, index: usize) -> Option<Credential> {
        self.state.lock().credentials.get(index).cloned()
    }

    /// Advance to the next credential. `false` when fewer than two remain.
    pub fn rotate(&self) -> bool {
        self.state.lock().rotate()
    }

    /// Jump to a specific position. `false` if out of range.
    pub fn rotate_to(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        if index >= state.credentials.len() {
            tracing::warn!(index, "Invalid credential index");
            return false;
        }
        let old = state.current_index;
        state.current_index = index;
        tracing::info!(from = old + 1, to = index + 1, "Rotated to specific credential");
        true
    }

    /// Go back to the first credential.
    pub fn reset_rotation(&self) {
        let mut state = self.state.lock();
        let old = state.current_index;
        state.current_index = 0;
        tracing::info!(from = old + 1, "Reset credential rotation");
    }

    /// Permanently remove a credential. `false` if it was not in the pool.
    pub fn mark_compromised(&self, credential: &Credential) -> bool {
        self.state.lock().revoke(credential)
    }

    /// React to a failed call made with the current credential.
    ///
    /// Returns `true` when the pool now hands out a different credential.
    pub fn handle_error<E: FailureKind + ?Sized>(&self, error: &E) -> bool {
        self.handle(None, error)
    }

    /// Like [`handle_error`](Self::handle_error), for a call made with `used`.
    ///
    /// A leaked `used` is revoked even if another thread already rotated past
    /// it; a quota error on a stale credential does not rotate a second time.
    pub fn handle_error_for<E: FailureKind + ?Sized>(&self, used: &Credential, error: &E) -> bool {
        self.handle(Some(used), error)
    }

    fn handle<E: FailureKind + ?Sized>(&self, used: Option<&Credential>, error: &E) -> bool {
        let Some(kind) = error.failure_kind() else {
            return false;
        };

        let mut state = self.state.lock();
        let Some(current) = state.current().cloned() else {
            return false;
        };
        let used = used.cloned().unwrap_or_else(|| current.clone());

        match kind {
            ErrorKind::Leaked => {
                let removed = state.revoke(&used);
                if used != current {
                    return removed || !state.credentials.is_empty();
                }
                let rotated = state.rotate();
                rotated || (removed && !state.credentials.is_empty())
            }
            ErrorKind::Quota => {
                if used != current {
                    tracing::debug!(credential = %used, "Quota error on stale credential; already rotated");
                    return true;
                }
                tracing::warn!(credential = %current, "Credential quota exhausted");
                state.rotate()
            }
            _ => false,
        }
    }

    /// Add a credential at the end of the rotation.
    ///
    /// Revoked and duplicate credentials are refused.
    pub fn add(&self, credential: impl Into<Credential>) -> bool {
        let credential = credential.into();
        let mut state = self.state.lock();
        if state.revoked.contains(&credential) {
            tracing::warn!(credential = %credential, "Refusing to re-admit revoked credential");
            return false;
        }
        if credential.expose().is_empty() || state.credentials.contains(&credential) {
            return false;
        }
        state.credentials.push(credential);
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().credentials.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.state.lock().current_index
    }

    pub fn revoked_count(&self) -> usize {
        self.state.lock().revoked.len()
    }

    pub fn has_multiple(&self) -> bool {
        self.state.lock().credentials.len() > 1
    }

    pub fn stats(&self) -> CredentialPoolStats {
        let state = self.state.lock();
        CredentialPoolStats {
            available: state.credentials.len(),
            current_index: state.current_index,
            revoked: state.revoked.len(),
            rotation_enabled: state.credentials.len() > 1,
            rotations: state.rotations,
        }
    }
}
