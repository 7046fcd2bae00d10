//! Job store
//!
//! Durable job records with status, assignment, and optimistic version.
//! The claim operation is the concurrency-critical path: it must hand a
//! queued job to exactly one runner, enforced here as an atomic
//! compare-and-swap on `status == Queued && runner_id IS NULL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tarmac_core::domain::job::{Job, JobOutcome, JobStatus, JobType};
use tarmac_core::{Error, Result};

/// Criteria for listing jobs; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub workspace_id: Option<Uuid>,
    pub runner_id: Option<String>,
    pub status: Option<JobStatus>,
}

/// Repository trait for durable job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a freshly enqueued job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Looks up a job by ID
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Lists jobs matching the filter, oldest first
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Atomically leases the oldest eligible queued job to a runner.
    ///
    /// A job is eligible when its tags are covered by the runner's
    /// capabilities. The winning transition moves Queued to Pending, sets
    /// `runner_id` and the bearer token, and stamps `pending_at`. Returns
    /// `None` when no queued job matches; that is not an error.
    async fn claim_next(
        &self,
        runner_id: &str,
        capabilities: &[String],
        token: &str,
    ) -> Result<Option<Job>>;

    /// Pending to Running; stamps `running_at`.
    ///
    /// Guarded by `expected_version`; a stale version yields `Conflict`.
    async fn start(&self, id: Uuid, expected_version: i64) -> Result<Job>;

    /// Running to Finished; stamps `finished_at` and records the outcome
    async fn finish(&self, id: Uuid, expected_version: i64, outcome: JobOutcome) -> Result<Job>;

    /// Sets `cancel_requested`, monotonic false to true
    async fn flag_cancel(&self, id: Uuid, expected_version: i64) -> Result<Job>;

    /// Whether `token` is the bearer token minted for this job at claim time
    async fn token_matches(&self, id: Uuid, token: &str) -> Result<bool>;
}

/// Postgres implementation of [`JobStore`]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes a stale version from a missing row after a guarded
    /// update matched nothing.
    async fn conflict_or_not_found(&self, id: Uuid) -> Error {
        match self.get(id).await {
            Ok(Some(job)) => Error::Conflict(format!(
                "job {} was modified concurrently (version {})",
                id, job.resource_version
            )),
            Ok(None) => Error::not_found("job", id),
            Err(err) => err,
        }
    }
}

const JOB_COLUMNS: &str = "id, run_id, workspace_id, job_type, status, tags, runner_id, \
     cancel_requested, max_duration_secs, created_by, queued_at, pending_at, \
     running_at, finished_at, outcome, resource_version";

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, run_id, workspace_id, job_type, status, tags,
                              cancel_requested, max_duration_secs, created_by,
                              queued_at, resource_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(job.run_id)
        .bind(job.workspace_id)
        .bind(type_to_string(job.job_type))
        .bind(status_to_string(job.status))
        .bind(serde_json::to_value(&job.tags).map_err(Error::internal)?)
        .bind(job.cancel_requested)
        .bind(job.max_duration_secs)
        .bind(&job.created_by)
        .bind(job.queued_at)
        .bind(job.resource_version)
        .execute(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE ($1::uuid IS NULL OR workspace_id = $1)
              AND ($2::varchar IS NULL OR runner_id = $2)
              AND ($3::varchar IS NULL OR status = $3)
            ORDER BY queued_at ASC
            "#
        ))
        .bind(filter.workspace_id)
        .bind(&filter.runner_id)
        .bind(filter.status.map(status_to_string))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn claim_next(
        &self,
        runner_id: &str,
        capabilities: &[String],
        token: &str,
    ) -> Result<Option<Job>> {
        let capabilities = serde_json::to_value(capabilities).map_err(Error::internal)?;

        // SKIP LOCKED keeps concurrent claimers from queueing up behind the
        // same candidate row; each either wins a different job or sees none.
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'Pending', runner_id = $1, token = $2, pending_at = $3,
                resource_version = resource_version + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'Queued' AND runner_id IS NULL AND tags <@ $4
                ORDER BY queued_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(runner_id)
        .bind(token)
        .bind(Utc::now())
        .bind(capabilities)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(row.map(|r| r.into()))
    }

    async fn start(&self, id: Uuid, expected_version: i64) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'Running', running_at = $2,
                resource_version = resource_version + 1
            WHERE id = $1 AND resource_version = $3
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(Utc::now())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        match row {
            Some(r) => Ok(r.into()),
            None => Err(self.conflict_or_not_found(id).await),
        }
    }

    async fn finish(&self, id: Uuid, expected_version: i64, outcome: JobOutcome) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'Finished', finished_at = $2, outcome = $3,
                resource_version = resource_version + 1
            WHERE id = $1 AND resource_version = $4
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(Utc::now())
        .bind(outcome_to_string(outcome))
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        match row {
            Some(r) => Ok(r.into()),
            None => Err(self.conflict_or_not_found(id).await),
        }
    }

    async fn flag_cancel(&self, id: Uuid, expected_version: i64) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET cancel_requested = TRUE,
                resource_version = resource_version + 1
            WHERE id = $1 AND resource_version = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        match row {
            Some(r) => Ok(r.into()),
            None => Err(self.conflict_or_not_found(id).await),
        }
    }

    async fn token_matches(&self, id: Uuid, token: &str) -> Result<bool> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT token FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::internal)?;

        match row {
            Some((stored,)) => Ok(stored.as_deref() == Some(token)),
            None => Err(Error::not_found("job", id)),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "Queued",
        JobStatus::Pending => "Pending",
        JobStatus::Running => "Running",
        JobStatus::Finished => "Finished",
    }
}

fn string_to_status(s: &str) -> JobStatus {
    match s {
        "Queued" => JobStatus::Queued,
        "Pending" => JobStatus::Pending,
        "Running" => JobStatus::Running,
        "Finished" => JobStatus::Finished,
        _ => JobStatus::Queued,
    }
}

fn type_to_string(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Plan => "plan",
        JobType::Apply => "apply",
    }
}

fn string_to_type(s: &str) -> JobType {
    match s {
        "apply" => JobType::Apply,
        _ => JobType::Plan,
    }
}

fn outcome_to_string(outcome: JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Succeeded => "Succeeded",
        JobOutcome::Failed => "Failed",
        JobOutcome::Canceled => "Canceled",
    }
}

fn string_to_outcome(s: &str) -> Option<JobOutcome> {
    match s {
        "Succeeded" => Some(JobOutcome::Succeeded),
        "Failed" => Some(JobOutcome::Failed),
        "Canceled" => Some(JobOutcome::Canceled),
        _ => None,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    run_id: Uuid,
    workspace_id: Uuid,
    job_type: String,
    status: String,
    tags: serde_json::Value,
    runner_id: Option<String>,
    cancel_requested: bool,
    max_duration_secs: i64,
    created_by: Option<String>,
    queued_at: DateTime<Utc>,
    pending_at: Option<DateTime<Utc>>,
    running_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    outcome: Option<String>,
    resource_version: i64,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let tags = serde_json::from_value(row.tags).unwrap_or_default();

        Job {
            id: row.id,
            run_id: row.run_id,
            workspace_id: row.workspace_id,
            job_type: string_to_type(&row.job_type),
            status: string_to_status(&row.status),
            tags,
            runner_id: row.runner_id,
            cancel_requested: row.cancel_requested,
            max_duration_secs: row.max_duration_secs,
            created_by: row.created_by,
            queued_at: row.queued_at,
            pending_at: row.pending_at,
            running_at: row.running_at,
            finished_at: row.finished_at,
            outcome: row.outcome.as_deref().and_then(string_to_outcome),
            resource_version: row.resource_version,
        }
    }
}
