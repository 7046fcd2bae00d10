//! Job scheduler composition root
//!
//! Wires the stores, brokers, and services together and exposes the
//! service-level operation surface the API layer consumes. Construct with
//! [`JobScheduler::postgres`] for production or [`JobScheduler::in_memory`]
//! for tests and embedded use; behavior is identical either way.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use tarmac_core::Result;
use tarmac_core::domain::event::{CancellationEvent, JobEvent, JobEventFilter};
use tarmac_core::domain::job::{Job, JobOutcome};
use tarmac_core::domain::log::{LogRecord, LogStreamKey};
use tarmac_core::domain::session::RunnerSession;
use tarmac_core::dto::job::{ClaimedJob, EnqueueJob};
use tarmac_core::dto::session::CreateSession;

use crate::broker::Subscription;
use crate::config::SchedulerConfig;
use crate::repository::{
    JobFilter, JobStore, LogStore, MemJobStore, MemLogStore, MemSessionStore, PgJobStore,
    PgLogStore, PgSessionStore, SessionStore,
};
use crate::service::{CancellationService, JobService, LogService, LogTail, SessionService};

pub struct JobScheduler {
    jobs: JobService,
    sessions: SessionService,
    cancellations: CancellationService,
    logs: LogService,
}

impl JobScheduler {
    /// Scheduler backed by Postgres; run `db::run_migrations` first
    pub fn postgres(pool: PgPool, config: SchedulerConfig) -> Result<Self> {
        Self::with_stores(
            config,
            Arc::new(PgJobStore::new(pool.clone())),
            Arc::new(PgSessionStore::new(pool.clone())),
            Arc::new(PgLogStore::new(pool)),
        )
    }

    /// Scheduler backed by in-memory stores
    pub fn in_memory(config: SchedulerConfig) -> Result<Self> {
        Self::with_stores(
            config,
            Arc::new(MemJobStore::new()),
            Arc::new(MemSessionStore::new()),
            Arc::new(MemLogStore::new()),
        )
    }

    pub fn with_stores(
        config: SchedulerConfig,
        jobs: Arc<dyn JobStore>,
        sessions: Arc<dyn SessionStore>,
        logs: Arc<dyn LogStore>,
    ) -> Result<Self> {
        config.validate()?;

        let log_service = LogService::new(logs, &config);

        Ok(Self {
            jobs: JobService::new(Arc::clone(&jobs), &config),
            sessions: SessionService::new(sessions, log_service.clone(), &config),
            cancellations: CancellationService::new(jobs, &config),
            logs: log_service,
        })
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Enqueue a new job on behalf of the run orchestrator
    pub async fn enqueue_job(&self, req: EnqueueJob) -> Result<Job> {
        self.jobs.enqueue(req).await
    }

    /// Lease a queued job to a runner; `Ok(None)` means no work available
    pub async fn claim_job(
        &self,
        runner_id: &str,
        capabilities: &[String],
    ) -> Result<Option<ClaimedJob>> {
        self.jobs.claim(runner_id, capabilities).await
    }

    /// The claiming runner acknowledges execution has begun
    pub async fn start_job(&self, job_id: Uuid) -> Result<Job> {
        self.jobs.start(job_id).await
    }

    /// The runner reports the job's terminal outcome
    pub async fn finish_job(&self, job_id: Uuid, outcome: JobOutcome) -> Result<Job> {
        self.jobs.finish(job_id, outcome).await
    }

    /// Verify a bearer token minted at claim time
    pub async fn authenticate_job_token(&self, job_id: Uuid, token: &str) -> Result<bool> {
        self.jobs.authenticate_token(job_id, token).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.jobs.get(job_id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.jobs.list(filter).await
    }

    /// Subscribe to lifecycle events for jobs matching the filter
    pub fn subscribe_job_events(&self, filter: JobEventFilter) -> Subscription<JobEvent> {
        self.jobs.subscribe(filter)
    }

    // =========================================================================
    // Runner sessions
    // =========================================================================

    pub async fn create_runner_session(&self, req: CreateSession) -> Result<RunnerSession> {
        self.sessions.create(req).await
    }

    pub async fn heartbeat(&self, session_id: Uuid) -> Result<()> {
        self.sessions.heartbeat(session_id).await
    }

    pub async fn report_session_error(&self, session_id: Uuid, message: &str) -> Result<()> {
        self.sessions.report_error(session_id, message).await
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<RunnerSession> {
        self.sessions.get(session_id).await
    }

    pub async fn list_sessions(&self, runner_id: Option<&str>) -> Result<Vec<RunnerSession>> {
        self.sessions.list(runner_id).await
    }

    /// Whether a session is live against the configured threshold
    pub fn session_is_active(&self, session: &RunnerSession) -> bool {
        self.sessions.is_active(session)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Request cooperative cancellation of a job; idempotent
    pub async fn request_cancellation(&self, job_id: Uuid) -> Result<()> {
        self.cancellations.request_cancel(job_id).await
    }

    pub fn subscribe_cancellation(&self, job_id: Uuid) -> Subscription<CancellationEvent> {
        self.cancellations.subscribe(job_id)
    }

    // =========================================================================
    // Logs
    // =========================================================================

    /// Append a chunk at `start_offset`; rejected unless it equals the size
    pub async fn append_log(
        &self,
        key: &LogStreamKey,
        start_offset: u64,
        data: Vec<u8>,
    ) -> Result<u64> {
        self.logs.append(key, start_offset, data).await
    }

    /// Mark a log stream completed; idempotent
    pub async fn complete_log(&self, key: &LogStreamKey) -> Result<()> {
        self.logs.complete(key).await
    }

    /// Read up to `limit` bytes at `offset`; out-of-range reads are empty
    pub async fn read_log(&self, key: &LogStreamKey, offset: u64, limit: u64) -> Result<Vec<u8>> {
        self.logs.read(key, offset, limit).await
    }

    pub async fn log_record(&self, key: &LogStreamKey) -> Result<Option<LogRecord>> {
        self.logs.record(key).await
    }

    /// Follow a log stream live from `last_seen_size` onward
    pub async fn subscribe_log_tail(
        &self,
        key: &LogStreamKey,
        last_seen_size: u64,
    ) -> Result<LogTail> {
        self.logs.subscribe_tail(key, last_seen_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarmac_core::domain::event::JobEventAction;
    use tarmac_core::domain::job::{JobStatus, JobType};

    fn scheduler() -> Arc<JobScheduler> {
        Arc::new(JobScheduler::in_memory(SchedulerConfig::default()).unwrap())
    }

    fn enqueue_req(workspace_id: Uuid) -> EnqueueJob {
        EnqueueJob {
            run_id: Uuid::new_v4(),
            workspace_id,
            job_type: JobType::Plan,
            tags: Vec::new(),
            max_duration_secs: None,
            created_by: Some("run-orchestrator".to_string()),
        }
    }

    #[tokio::test]
    async fn test_exactly_one_of_many_claimers_wins() {
        let scheduler = scheduler();
        let job = scheduler
            .enqueue_job(enqueue_req(Uuid::new_v4()))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let scheduler = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move {
                scheduler
                    .claim_job(&format!("runner-{i}"), &[])
                    .await
                    .unwrap()
            }));
        }

        let mut claims = Vec::new();
        for handle in handles {
            if let Some(claimed) = handle.await.unwrap() {
                claims.push(claimed);
            }
        }

        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].job.id, job.id);
    }

    #[tokio::test]
    async fn test_full_lifecycle_with_events_and_logs() {
        let scheduler = scheduler();
        let workspace_id = Uuid::new_v4();
        let mut events = scheduler.subscribe_job_events(JobEventFilter::for_workspace(workspace_id));

        let job = scheduler.enqueue_job(enqueue_req(workspace_id)).await.unwrap();
        let claimed = scheduler.claim_job("runner-1", &[]).await.unwrap().unwrap();
        assert!(
            scheduler
                .authenticate_job_token(job.id, &claimed.token)
                .await
                .unwrap()
        );

        scheduler.start_job(job.id).await.unwrap();

        let key = LogStreamKey::Job(job.id);
        let size = scheduler
            .append_log(&key, 0, b"Initializing plan...\n".to_vec())
            .await
            .unwrap();
        scheduler
            .append_log(&key, size, b"No changes.\n".to_vec())
            .await
            .unwrap();
        scheduler.complete_log(&key).await.unwrap();

        scheduler.finish_job(job.id, JobOutcome::Succeeded).await.unwrap();

        let actions: Vec<JobEventAction> = [
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.action)
        .collect();
        assert_eq!(
            actions,
            vec![
                JobEventAction::Queued,
                JobEventAction::Claimed,
                JobEventAction::Started,
                JobEventAction::Finished,
            ]
        );

        let log = scheduler.read_log(&key, 0, 1024).await.unwrap();
        assert_eq!(log, b"Initializing plan...\nNo changes.\n");

        let record = scheduler.log_record(&key).await.unwrap().unwrap();
        assert!(record.completed);

        let stored = scheduler.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert_eq!(stored.outcome, Some(JobOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_cancellation_reaches_runner_side_subscriber() {
        let scheduler = scheduler();
        let job = scheduler
            .enqueue_job(enqueue_req(Uuid::new_v4()))
            .await
            .unwrap();
        scheduler.claim_job("runner-1", &[]).await.unwrap().unwrap();
        scheduler.start_job(job.id).await.unwrap();

        let mut sub = scheduler.subscribe_cancellation(job.id);
        scheduler.request_cancellation(job.id).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert!(event.job.cancel_requested);

        // The runner winds down cooperatively and reports the outcome.
        scheduler.finish_job(job.id, JobOutcome::Canceled).await.unwrap();
        let stored = scheduler.get_job(job.id).await.unwrap();
        assert_eq!(stored.outcome, Some(JobOutcome::Canceled));
    }

    #[tokio::test]
    async fn test_log_tail_bridges_polled_and_live_state() {
        let scheduler = scheduler();
        let key = LogStreamKey::Job(Uuid::new_v4());

        scheduler.append_log(&key, 0, b"0123456789".to_vec()).await.unwrap();

        let mut tail = scheduler.subscribe_log_tail(&key, 3).await.unwrap();
        let catch_up = tail.next().await.unwrap();
        assert_eq!(catch_up.offset, 3);
        assert_eq!(catch_up.data, b"3456789");

        scheduler.append_log(&key, 10, b"ab".to_vec()).await.unwrap();
        let live = tail.next().await.unwrap();
        assert_eq!(live.offset, 10);
        assert_eq!(live.data, b"ab");
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_listing() {
        let scheduler = scheduler();
        let session = scheduler
            .create_runner_session(CreateSession {
                runner_id: "runner-1".to_string(),
                internal: true,
            })
            .await
            .unwrap();

        scheduler.heartbeat(session.id).await.unwrap();
        scheduler
            .report_session_error(session.id, "image pull failed")
            .await
            .unwrap();

        let sessions = scheduler.list_sessions(Some("runner-1")).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].error_count, 1);
        assert!(scheduler.session_is_active(&sessions[0]));

        assert!(scheduler.list_sessions(Some("runner-2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claims_filtered_by_workspace_listing() {
        let scheduler = scheduler();
        let workspace_id = Uuid::new_v4();
        scheduler.enqueue_job(enqueue_req(workspace_id)).await.unwrap();
        scheduler.enqueue_job(enqueue_req(Uuid::new_v4())).await.unwrap();

        let filter = JobFilter {
            workspace_id: Some(workspace_id),
            ..JobFilter::default()
        };
        let jobs = scheduler.list_jobs(&filter).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].workspace_id, workspace_id);

        let queued = JobFilter {
            status: Some(JobStatus::Queued),
            ..JobFilter::default()
        };
        assert_eq!(scheduler.list_jobs(&queued).await.unwrap().len(), 2);
    }
}
