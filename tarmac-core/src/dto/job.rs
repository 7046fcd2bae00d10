//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobType};

/// Request to enqueue a new job, issued by the run orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueJob {
    pub run_id: Uuid,
    pub workspace_id: Uuid,
    pub job_type: JobType,
    /// Tags a runner must cover to be eligible for this job
    pub tags: Vec<String>,
    /// Overrides the configured default when set
    pub max_duration_secs: Option<i64>,
    /// Caller identity for the audit trail
    pub created_by: Option<String>,
}

/// A successfully leased job, handed back to the claiming runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub job: Job,
    /// Opaque bearer token scoped to this job
    pub token: String,
}
