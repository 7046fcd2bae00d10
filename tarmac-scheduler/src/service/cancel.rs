//! Cancellation service
//!
//! Records cancellation requests against jobs and republishes them to
//! subscribers. The flag is advisory: the runner loop observes it (or the
//! event) and winds the job down cooperatively; status still advances
//! through the normal finish path.

use std::sync::Arc;

use uuid::Uuid;

use tarmac_core::domain::event::CancellationEvent;
use tarmac_core::{Error, Result};

use crate::broker::{EventBroker, Subscription};
use crate::config::SchedulerConfig;
use crate::repository::JobStore;

#[derive(Clone)]
pub struct CancellationService {
    jobs: Arc<dyn JobStore>,
    events: EventBroker<CancellationEvent>,
}

impl CancellationService {
    pub fn new(jobs: Arc<dyn JobStore>, config: &SchedulerConfig) -> Self {
        Self {
            jobs,
            events: EventBroker::new("cancellations", config.event_buffer),
        }
    }

    /// Request cancellation of a job; idempotent.
    ///
    /// The first request sets the flag and publishes one event to the
    /// job's subscribers. Repeated requests publish nothing and do not
    /// error.
    pub async fn request_cancel(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::not_found("job", job_id))?;

        if job.cancel_requested {
            tracing::debug!("Cancellation already requested for job {}", job_id);
            return Ok(());
        }

        if job.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "job {job_id} is already finished"
            )));
        }

        let job = match self.jobs.flag_cancel(job_id, job.resource_version).await {
            Ok(job) => job,
            // Lost a race against a concurrent mutation; if that mutation
            // was the cancellation itself, this request is already served.
            Err(err) if err.is_conflict() => {
                let current = self
                    .jobs
                    .get(job_id)
                    .await?
                    .ok_or_else(|| Error::not_found("job", job_id))?;
                if current.cancel_requested {
                    return Ok(());
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        tracing::info!("Cancellation requested for job {}", job_id);
        self.events.publish(&CancellationEvent { job });

        Ok(())
    }

    /// Subscribe to cancellation events for one job.
    ///
    /// Emits only events published after subscription start; no replay.
    pub fn subscribe(&self, job_id: Uuid) -> Subscription<CancellationEvent> {
        self.events
            .subscribe_filtered(move |event: &CancellationEvent| event.job.id == job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{JobStore, MemJobStore};
    use chrono::Utc;
    use tarmac_core::domain::job::{Job, JobStatus, JobType};

    fn queued_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            job_type: JobType::Apply,
            status: JobStatus::Queued,
            tags: Vec::new(),
            runner_id: None,
            cancel_requested: false,
            max_duration_secs: 3600,
            created_by: None,
            queued_at: Utc::now(),
            pending_at: None,
            running_at: None,
            finished_at: None,
            outcome: None,
            resource_version: 1,
        }
    }

    async fn service_with_job() -> (CancellationService, Arc<MemJobStore>, Job) {
        let store = Arc::new(MemJobStore::new());
        let job = queued_job();
        store.insert(&job).await.unwrap();
        let service = CancellationService::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            &SchedulerConfig::default(),
        );
        (service, store, job)
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers_exactly_once() {
        let (service, _store, job) = service_with_job().await;
        let mut a = service.subscribe(job.id);
        let mut b = service.subscribe(job.id);

        service.request_cancel(job.id).await.unwrap();

        assert_eq!(a.recv().await.unwrap().job.id, job.id);
        assert_eq!(b.recv().await.unwrap().job.id, job.id);

        // Second request: no error, no new event.
        service.request_cancel(job.id).await.unwrap();
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_flag_is_set_on_first_request() {
        let (service, store, job) = service_with_job().await;
        service.request_cancel(job.id).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert!(stored.cancel_requested);
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (service, _store, _job) = service_with_job().await;
        let err = service.request_cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_subscriber_on_other_job_sees_nothing() {
        let (service, store, job) = service_with_job().await;
        let other = queued_job();
        store.insert(&other).await.unwrap();

        let mut sub = service.subscribe(other.id);
        service.request_cancel(job.id).await.unwrap();

        assert!(sub.try_recv().is_none());
    }
}
