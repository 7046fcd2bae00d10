//! Error types shared across the Tarmac services

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the scheduling core
///
/// `NotFound` and `Conflict` are expected, recoverable conditions; callers
/// are expected to retry or reinterpret them. `InvalidState` is a rejected
/// request. `Internal` wraps storage failures and is never silently
/// swallowed. Nothing in this taxonomy is retried automatically.
#[derive(Debug, Error)]
pub enum Error {
    /// The named entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Illegal state transition or malformed request
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Optimistic-version mismatch or lost claim race
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage or transport failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a `NotFound` error for an entity kind and identifier
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    /// Wrap an underlying failure as an `Internal` error
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error is a conflict (version mismatch or lost race)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if this error is a rejected state transition
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::not_found("job", "abc").is_not_found());
        assert!(Error::Conflict("stale version".to_string()).is_conflict());
        assert!(Error::InvalidState("bad transition".to_string()).is_invalid_state());
        assert!(!Error::internal("io failure").is_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = Error::not_found("runner session", "s-1");
        assert_eq!(err.to_string(), "runner session s-1 not found");
    }
}
