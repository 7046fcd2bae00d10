//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of requested work, leased to exactly one runner.
///
/// Structure shared between the scheduler (persists) and the API layer
/// (reads). Jobs are created `Queued` by the run orchestrator and advance
/// only forward through the status machine; they are never deleted, only
/// superseded by new jobs for subsequent runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub run_id: Uuid,
    pub workspace_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Tags used for runner-affinity matching at claim time
    pub tags: Vec<String>,
    /// Assigned runner; set exactly once, at claim time
    pub runner_id: Option<String>,
    /// Advisory flag, monotonic false to true; observed by the runner loop
    pub cancel_requested: bool,
    /// Enforced by the external timeout reaper
    pub max_duration_secs: i64,
    /// Caller identity recorded at enqueue time
    pub created_by: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub pending_at: Option<DateTime<Utc>>,
    pub running_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal outcome reported by the runner, recorded at finish
    pub outcome: Option<JobOutcome>,
    /// Incremented on every mutating update; optimistic-concurrency guard
    pub resource_version: i64,
}

/// Job execution status
///
/// Transitions follow `Queued -> Pending -> Running -> Finished` only;
/// backward or skipped transitions are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Pending,
    Running,
    Finished,
}

impl JobStatus {
    /// Whether `next` is a legal forward transition from this status
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Pending)
                | (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Finished)
        )
    }

    /// Whether this status admits no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Finished => write!(f, "Finished"),
        }
    }
}

/// Kind of work a job performs; immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    Plan,
    Apply,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Plan => write!(f, "plan"),
            JobType::Apply => write!(f, "apply"),
        }
    }
}

/// How a finished job ended, as reported by its runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Finished));
    }

    #[test]
    fn test_backward_and_skipped_transitions_rejected() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Finished));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Finished.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_finished_is_terminal() {
        assert!(JobStatus::Finished.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
