//! Error types for lock coordination.

use std::time::Duration;
use thiserror::Error;

use crate::state::LockerState;

/// Errors that can occur during coordinator and locker operations.
///
/// Any error from [`Locker::lock`](crate::traits::Locker::lock) means the
/// exclusion was not obtained and the critical section must not run. Errors
/// from [`Locker::unlock`](crate::traits::Locker::unlock) are advisory: the
/// locker is back in `Unlocked` regardless.
#[derive(Error, Debug)]
pub enum LockError {
    /// The call is not valid in the locker's current state.
    #[error("cannot {operation} a locker that is {state}")]
    InvalidState {
        operation: &'static str,
        state: LockerState,
    },

    /// The context was cancelled or its deadline passed.
    #[error("lock operation was canceled")]
    Canceled,

    /// The coordination store is unreachable or rejected a lease operation.
    #[error("coordination backend unavailable: {0}")]
    BackendUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Local release succeeded but the remote lock record could not be
    /// removed; it stays until its lease expires.
    #[error("lock '{key}' stranded for at most {max_staleness:?}: {source}")]
    LockStranded {
        key: String,
        max_staleness: Duration,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The key is empty or otherwise unusable.
    #[error("invalid lock key: {0}")]
    InvalidKey(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    /// Wraps a store client error as [`LockError::BackendUnavailable`].
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::BackendUnavailable(Box::new(err))
    }

    /// Builds a [`LockError::BackendUnavailable`] from a message.
    pub fn backend_msg(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(Box::new(std::io::Error::other(msg.into())))
    }

    /// True when the store could not be reached, including stranded releases.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::LockStranded { .. })
    }

    /// True for API misuse.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_classification() {
        let err = LockError::backend_msg("connection refused");
        assert!(err.is_backend_unavailable());
        assert!(!err.is_canceled());

        let stranded = LockError::LockStranded {
            key: "doc-1".to_string(),
            max_staleness: Duration::from_secs(30),
            source: Box::new(std::io::Error::other("timeout")),
        };
        assert!(stranded.is_backend_unavailable());
        assert!(stranded.to_string().contains("doc-1"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = LockError::InvalidState {
            operation: "unlock",
            state: LockerState::Unlocked,
        };
        assert!(err.is_invalid_state());
        assert_eq!(err.to_string(), "cannot unlock a locker that is unlocked");
    }
}
