//! Log stream domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one append-only log stream.
///
/// A closed set of owning entity kinds: job output logs and runner-session
/// error logs. Keeping this a tagged variant (rather than a stringly-typed
/// key) gives each consumer a compile-time-checked owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogStreamKey {
    /// Output log of a job
    Job(Uuid),
    /// Error-report log of a runner session
    Session(Uuid),
}

impl LogStreamKey {
    pub fn kind(&self) -> &'static str {
        match self {
            LogStreamKey::Job(_) => "job",
            LogStreamKey::Session(_) => "session",
        }
    }

    pub fn owner_id(&self) -> Uuid {
        match self {
            LogStreamKey::Job(id) | LogStreamKey::Session(id) => *id,
        }
    }
}

impl std::fmt::Display for LogStreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind(), self.owner_id())
    }
}

/// Metadata of one append-only byte log.
///
/// `size` is monotonically non-decreasing; `completed` is set true exactly
/// once when the producer signals end-of-stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub size: u64,
    pub completed: bool,
    pub last_updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_display() {
        let id = Uuid::new_v4();
        assert_eq!(LogStreamKey::Job(id).to_string(), format!("job/{id}"));
        assert_eq!(
            LogStreamKey::Session(id).to_string(),
            format!("session/{id}")
        );
    }

    #[test]
    fn test_stream_keys_distinct_by_kind() {
        let id = Uuid::new_v4();
        assert_ne!(LogStreamKey::Job(id), LogStreamKey::Session(id));
    }
}
