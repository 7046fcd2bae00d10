//! Optimistic-concurrency version checking
//!
//! Every mutating update to a stored entity is guarded by a monotonically
//! incrementing resource version. This module centralizes the
//! check-and-bump step so each store performs the comparison the same way.

use crate::error::{Error, Result};

/// Compare the version a caller observed against the current stored version.
///
/// Returns the next version on match, or `Error::Conflict` when the entity
/// was mutated since the caller last read it.
pub fn check_and_bump(expected: i64, current: i64) -> Result<i64> {
    if expected == current {
        Ok(current + 1)
    } else {
        Err(Error::Conflict(format!(
            "resource version mismatch (expected {expected}, current {current})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_and_bump_match() {
        assert_eq!(check_and_bump(1, 1).unwrap(), 2);
        assert_eq!(check_and_bump(41, 41).unwrap(), 42);
    }

    #[test]
    fn test_check_and_bump_stale() {
        let err = check_and_bump(1, 3).unwrap_err();
        assert!(err.is_conflict());
    }
}
