//! Runner session service
//!
//! Tracks liveness of connected runners. A session dies by going quiet:
//! staleness is derived lazily from the last heartbeat, so this service
//! needs no sweeper of its own; an external periodic task reaps idle
//! sessions through the same read queries everyone else uses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use tarmac_core::domain::log::LogStreamKey;
use tarmac_core::domain::session::RunnerSession;
use tarmac_core::dto::session::CreateSession;
use tarmac_core::{Error, Result};

use crate::config::SchedulerConfig;
use crate::repository::SessionStore;
use crate::service::log::LogService;

#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    logs: LogService,
    liveness_threshold: Duration,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        logs: LogService,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            sessions,
            logs,
            liveness_threshold: config.liveness_threshold,
        }
    }

    /// Establish a session for a connecting runner
    pub async fn create(&self, req: CreateSession) -> Result<RunnerSession> {
        if req.runner_id.trim().is_empty() {
            return Err(Error::InvalidState(
                "runner_id cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let session = RunnerSession {
            id: Uuid::new_v4(),
            runner_id: req.runner_id,
            internal: req.internal,
            error_count: 0,
            created_at: now,
            last_contact_at: now,
        };

        self.sessions.insert(&session).await?;

        tracing::info!(
            "Runner session {} created for runner {}",
            session.id,
            session.runner_id
        );

        Ok(session)
    }

    /// Record a heartbeat; updates the last contact time, nothing else
    pub async fn heartbeat(&self, session_id: Uuid) -> Result<()> {
        let updated = self.sessions.touch(session_id, Utc::now()).await?;

        if !updated {
            return Err(Error::not_found("runner session", session_id));
        }

        tracing::debug!("Heartbeat received for session {}", session_id);
        Ok(())
    }

    /// The runner reports an operational error on its session.
    ///
    /// Increments the session error counter and appends the message to the
    /// session's error-log stream for later inspection.
    pub async fn report_error(&self, session_id: Uuid, message: &str) -> Result<()> {
        let session = self
            .sessions
            .record_error(session_id)
            .await?
            .ok_or_else(|| Error::not_found("runner session", session_id))?;

        let key = LogStreamKey::Session(session_id);
        let size = self
            .logs
            .record(&key)
            .await?
            .map(|r| r.size)
            .unwrap_or(0);

        let mut line = message.as_bytes().to_vec();
        line.push(b'\n');
        self.logs.append(&key, size, line).await?;

        tracing::warn!(
            "Runner session {} reported error #{}: {}",
            session_id,
            session.error_count,
            message
        );

        Ok(())
    }

    /// Get a session by ID
    pub async fn get(&self, session_id: Uuid) -> Result<RunnerSession> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::not_found("runner session", session_id))
    }

    /// List sessions, optionally restricted to one runner
    pub async fn list(&self, runner_id: Option<&str>) -> Result<Vec<RunnerSession>> {
        self.sessions.list(runner_id).await
    }

    /// Whether the session is live against the configured threshold
    pub fn is_active(&self, session: &RunnerSession) -> bool {
        session.is_active(self.liveness_threshold, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemLogStore, MemSessionStore};

    fn service() -> SessionService {
        let config = SchedulerConfig::default();
        let logs = LogService::new(Arc::new(MemLogStore::new()), &config);
        SessionService::new(Arc::new(MemSessionStore::new()), logs, &config)
    }

    fn create_req() -> CreateSession {
        CreateSession {
            runner_id: "runner-1".to_string(),
            internal: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_heartbeat() {
        let service = service();
        let session = service.create(create_req()).await.unwrap();
        assert_eq!(session.error_count, 0);

        service.heartbeat(session.id).await.unwrap();
        let refreshed = service.get(session.id).await.unwrap();
        assert!(refreshed.last_contact_at >= session.last_contact_at);
        assert!(service.is_active(&refreshed));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_session() {
        let service = service();
        let err = service.heartbeat(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_runner_id_rejected() {
        let service = service();
        let err = service
            .create(CreateSession {
                runner_id: "  ".to_string(),
                internal: false,
            })
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_report_error_counts_and_logs() {
        let service = service();
        let session = service.create(create_req()).await.unwrap();

        service.report_error(session.id, "podman died").await.unwrap();
        service.report_error(session.id, "disk full").await.unwrap();

        let refreshed = service.get(session.id).await.unwrap();
        assert_eq!(refreshed.error_count, 2);

        let key = LogStreamKey::Session(session.id);
        let log = service.logs.read(&key, 0, 1024).await.unwrap();
        assert_eq!(log, b"podman died\ndisk full\n");
    }

    #[tokio::test]
    async fn test_report_error_unknown_session() {
        let service = service();
        let err = service.report_error(Uuid::new_v4(), "boom").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
