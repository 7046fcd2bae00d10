//! Job service
//!
//! Job lifecycle orchestration: enqueue, exclusive claim, start, finish,
//! and the read queries. Every transition is validated against the
//! monotonic state machine before the version-guarded mutation is handed
//! to the store, and publishes a lifecycle event on success.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use tarmac_core::domain::event::{JobEvent, JobEventAction, JobEventFilter};
use tarmac_core::domain::job::{Job, JobOutcome, JobStatus};
use tarmac_core::dto::job::{ClaimedJob, EnqueueJob};
use tarmac_core::{Error, Result};

use crate::broker::{EventBroker, Subscription};
use crate::config::SchedulerConfig;
use crate::repository::{JobFilter, JobStore};

#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    events: EventBroker<JobEvent>,
    default_max_duration_secs: i64,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, config: &SchedulerConfig) -> Self {
        Self {
            jobs,
            events: EventBroker::new("jobs", config.event_buffer),
            default_max_duration_secs: config.default_max_job_duration.as_secs() as i64,
        }
    }

    /// Enqueue a new job on behalf of the run orchestrator
    pub async fn enqueue(&self, req: EnqueueJob) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            run_id: req.run_id,
            workspace_id: req.workspace_id,
            job_type: req.job_type,
            status: JobStatus::Queued,
            tags: req.tags,
            runner_id: None,
            cancel_requested: false,
            max_duration_secs: req.max_duration_secs.unwrap_or(self.default_max_duration_secs),
            created_by: req.created_by,
            queued_at: Utc::now(),
            pending_at: None,
            running_at: None,
            finished_at: None,
            outcome: None,
            resource_version: 1,
        };

        self.jobs.insert(&job).await?;

        tracing::info!(
            "Job {} queued: {} for run {}",
            job.id,
            job.job_type,
            job.run_id
        );
        self.publish(JobEventAction::Queued, &job);

        Ok(job)
    }

    /// Lease the oldest eligible queued job to a runner.
    ///
    /// Mints an opaque bearer token scoped to the job. Returns `Ok(None)`
    /// when no queued job matches the runner's capabilities; that is the
    /// normal idle case, not an error.
    pub async fn claim(
        &self,
        runner_id: &str,
        capabilities: &[String],
    ) -> Result<Option<ClaimedJob>> {
        let token = Uuid::new_v4().to_string();

        match self.jobs.claim_next(runner_id, capabilities, &token).await? {
            Some(job) => {
                tracing::info!("Job {} leased to runner {}", job.id, runner_id);
                self.publish(JobEventAction::Claimed, &job);
                Ok(Some(ClaimedJob { job, token }))
            }
            None => {
                tracing::debug!("No queued job matches runner {}", runner_id);
                Ok(None)
            }
        }
    }

    /// The runner acknowledges it has begun executing the job
    pub async fn start(&self, job_id: Uuid) -> Result<Job> {
        let job = self.get(job_id).await?;
        ensure_transition(&job, JobStatus::Running)?;

        let job = self.jobs.start(job_id, job.resource_version).await?;

        tracing::info!("Job {} started on runner {:?}", job.id, job.runner_id);
        self.publish(JobEventAction::Started, &job);

        Ok(job)
    }

    /// The runner reports the job's terminal outcome
    pub async fn finish(&self, job_id: Uuid, outcome: JobOutcome) -> Result<Job> {
        let job = self.get(job_id).await?;
        ensure_transition(&job, JobStatus::Finished)?;

        let job = self.jobs.finish(job_id, job.resource_version, outcome).await?;

        tracing::info!("Job {} finished: {:?}", job.id, outcome);
        self.publish(JobEventAction::Finished, &job);

        Ok(job)
    }

    /// Get a job by ID
    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    /// List jobs matching the filter
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.jobs.list(filter).await
    }

    /// Verify the bearer token minted for a job at claim time
    pub async fn authenticate_token(&self, job_id: Uuid, token: &str) -> Result<bool> {
        self.jobs.token_matches(job_id, token).await
    }

    /// Subscribe to lifecycle events for jobs matching the filter.
    ///
    /// Only events published after subscription start are delivered.
    pub fn subscribe(&self, filter: JobEventFilter) -> Subscription<JobEvent> {
        self.events
            .subscribe_filtered(move |event: &JobEvent| filter.matches(&event.job))
    }

    fn publish(&self, action: JobEventAction, job: &Job) {
        self.events.publish(&JobEvent {
            action,
            job: job.clone(),
        });
    }
}

fn ensure_transition(job: &Job, next: JobStatus) -> Result<()> {
    if job.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(Error::InvalidState(format!(
            "job {} cannot transition from {} to {}",
            job.id, job.status, next
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemJobStore;
    use tarmac_core::domain::job::JobType;

    fn service() -> JobService {
        JobService::new(Arc::new(MemJobStore::new()), &SchedulerConfig::default())
    }

    fn enqueue_req() -> EnqueueJob {
        EnqueueJob {
            run_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            job_type: JobType::Plan,
            tags: Vec::new(),
            max_duration_secs: None,
            created_by: Some("ci-user".to_string()),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_happy_path() {
        let service = service();

        let job = service.enqueue(enqueue_req()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.created_by.as_deref(), Some("ci-user"));

        let claimed = service.claim("runner-1", &[]).await.unwrap().unwrap();
        assert_eq!(claimed.job.status, JobStatus::Pending);
        assert_eq!(claimed.job.runner_id.as_deref(), Some("runner-1"));
        assert!(claimed.job.pending_at.is_some());

        let started = service.start(job.id).await.unwrap();
        assert_eq!(started.status, JobStatus::Running);

        let finished = service.finish(job.id, JobOutcome::Succeeded).await.unwrap();
        assert_eq!(finished.status, JobStatus::Finished);
        assert_eq!(finished.outcome, Some(JobOutcome::Succeeded));
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_claim_with_no_work_returns_none() {
        let service = service();
        assert!(service.claim("runner-1", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skipped_transition_rejected() {
        let service = service();
        let job = service.enqueue(enqueue_req()).await.unwrap();

        // Still Queued: neither start nor finish is reachable.
        let err = service.start(job.id).await.unwrap_err();
        assert!(err.is_invalid_state());
        let err = service.finish(job.id, JobOutcome::Failed).await.unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_terminal_job_rejects_mutation() {
        let service = service();
        let job = service.enqueue(enqueue_req()).await.unwrap();
        service.claim("runner-1", &[]).await.unwrap().unwrap();
        service.start(job.id).await.unwrap();
        service.finish(job.id, JobOutcome::Succeeded).await.unwrap();

        let err = service.finish(job.id, JobOutcome::Failed).await.unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_claim_publishes_filtered_event() {
        let service = service();
        let mut sub = service.subscribe(JobEventFilter::for_runner("runner-1"));

        service.enqueue(enqueue_req()).await.unwrap();
        let claimed = service.claim("runner-1", &[]).await.unwrap().unwrap();

        // The Queued event has no runner and is filtered out.
        let event = sub.recv().await.unwrap();
        assert_eq!(event.action, JobEventAction::Claimed);
        assert_eq!(event.job.id, claimed.job.id);
    }

    #[tokio::test]
    async fn test_token_authentication() {
        let service = service();
        let job = service.enqueue(enqueue_req()).await.unwrap();
        let claimed = service.claim("runner-1", &[]).await.unwrap().unwrap();

        assert!(service.authenticate_token(job.id, &claimed.token).await.unwrap());
        assert!(!service.authenticate_token(job.id, "forged").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let service = service();
        let err = service.get(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
