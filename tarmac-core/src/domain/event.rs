//! Notification events
//!
//! Events are ephemeral: published once per state change, delivered
//! best-effort to live subscribers, and dropped when nobody is listening.
//! Each topic carries its own payload type so subscribers get
//! compile-time-checked event shapes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::Job;
use crate::domain::log::LogStreamKey;

/// What happened to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventAction {
    Queued,
    Claimed,
    Started,
    Finished,
}

/// Lifecycle event carrying a snapshot of the job that changed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub action: JobEventAction,
    pub job: Job,
}

/// Published once when cancellation is first requested for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationEvent {
    pub job: Job,
}

/// One appended chunk (or the end-of-stream marker) of a log stream.
///
/// `offset` is where the chunk begins; a `completed` event carries no data
/// and its offset equals the final stream size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub stream: LogStreamKey,
    pub offset: u64,
    pub data: Vec<u8>,
    pub completed: bool,
}

/// Conjunctive filter over job lifecycle events.
///
/// An unset field matches everything; set fields must all match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobEventFilter {
    pub job_id: Option<Uuid>,
    pub runner_id: Option<String>,
    pub workspace_id: Option<Uuid>,
}

impl JobEventFilter {
    /// Match all jobs
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_job(job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::default()
        }
    }

    pub fn for_runner(runner_id: impl Into<String>) -> Self {
        Self {
            runner_id: Some(runner_id.into()),
            ..Self::default()
        }
    }

    pub fn for_workspace(workspace_id: Uuid) -> Self {
        Self {
            workspace_id: Some(workspace_id),
            ..Self::default()
        }
    }

    /// Whether a job snapshot passes every set criterion
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(job_id) = self.job_id {
            if job.id != job_id {
                return false;
            }
        }
        if let Some(runner_id) = &self.runner_id {
            if job.runner_id.as_deref() != Some(runner_id.as_str()) {
                return false;
            }
        }
        if let Some(workspace_id) = self.workspace_id {
            if job.workspace_id != workspace_id {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobStatus, JobType};

    fn job(workspace_id: Uuid, runner_id: Option<&str>) -> Job {
        Job {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            workspace_id,
            job_type: JobType::Plan,
            status: JobStatus::Queued,
            tags: Vec::new(),
            runner_id: runner_id.map(|r| r.to_string()),
            cancel_requested: false,
            max_duration_secs: 3600,
            created_by: None,
            queued_at: chrono::Utc::now(),
            pending_at: None,
            running_at: None,
            finished_at: None,
            outcome: None,
            resource_version: 1,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = JobEventFilter::all();
        assert!(filter.matches(&job(Uuid::new_v4(), None)));
        assert!(filter.matches(&job(Uuid::new_v4(), Some("runner-1"))));
    }

    #[test]
    fn test_filter_by_workspace() {
        let workspace_id = Uuid::new_v4();
        let filter = JobEventFilter::for_workspace(workspace_id);
        assert!(filter.matches(&job(workspace_id, None)));
        assert!(!filter.matches(&job(Uuid::new_v4(), None)));
    }

    #[test]
    fn test_filter_by_runner() {
        let filter = JobEventFilter::for_runner("runner-1");
        assert!(filter.matches(&job(Uuid::new_v4(), Some("runner-1"))));
        assert!(!filter.matches(&job(Uuid::new_v4(), Some("runner-2"))));
        assert!(!filter.matches(&job(Uuid::new_v4(), None)));
    }

    #[test]
    fn test_conjunctive_criteria() {
        let workspace_id = Uuid::new_v4();
        let filter = JobEventFilter {
            workspace_id: Some(workspace_id),
            runner_id: Some("runner-1".to_string()),
            job_id: None,
        };
        assert!(filter.matches(&job(workspace_id, Some("runner-1"))));
        assert!(!filter.matches(&job(workspace_id, Some("runner-2"))));
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = JobEvent {
            action: JobEventAction::Claimed,
            job: job(Uuid::new_v4(), Some("runner-1")),
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: JobEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.action, JobEventAction::Claimed);
        assert_eq!(decoded.job.id, event.job.id);
    }
}
