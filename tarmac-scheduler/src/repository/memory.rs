//! In-memory stores
//!
//! Per-entity mutex implementations of the storage traits, for tests and
//! embedded deployments. The outer map lock is held only long enough to
//! fetch an entity handle; the entity's own mutex is held for the whole
//! read-modify-write, serializing mutations per entity while leaving
//! different entities fully parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tarmac_core::domain::job::{Job, JobOutcome, JobStatus};
use tarmac_core::domain::log::{LogRecord, LogStreamKey};
use tarmac_core::domain::session::RunnerSession;
use tarmac_core::version;
use tarmac_core::{Error, Result};

use super::jobs::{JobFilter, JobStore};
use super::logs::LogStore;
use super::sessions::SessionStore;

// =============================================================================
// Jobs
// =============================================================================

struct JobEntry {
    job: Job,
    token: Option<String>,
}

/// In-memory implementation of [`JobStore`]
#[derive(Default)]
pub struct MemJobStore {
    jobs: Mutex<HashMap<Uuid, Arc<Mutex<JobEntry>>>>,
}

impl MemJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: Uuid) -> Result<Arc<Mutex<JobEntry>>> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", id))
    }
}

#[async_trait]
impl JobStore for MemJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(Error::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(
            job.id,
            Arc::new(Mutex::new(JobEntry {
                job: job.clone(),
                token: None,
            })),
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let entry = self.jobs.lock().unwrap().get(&id).cloned();
        Ok(entry.map(|e| e.lock().unwrap().job.clone()))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let entries: Vec<_> = self.jobs.lock().unwrap().values().cloned().collect();

        let mut jobs: Vec<Job> = entries
            .iter()
            .map(|e| e.lock().unwrap().job.clone())
            .filter(|job| {
                filter.workspace_id.is_none_or(|w| job.workspace_id == w)
                    && filter
                        .runner_id
                        .as_deref()
                        .is_none_or(|r| job.runner_id.as_deref() == Some(r))
                    && filter.status.is_none_or(|s| job.status == s)
            })
            .collect();

        jobs.sort_by_key(|job| job.queued_at);
        Ok(jobs)
    }

    async fn claim_next(
        &self,
        runner_id: &str,
        capabilities: &[String],
        token: &str,
    ) -> Result<Option<Job>> {
        // Snapshot the candidates oldest-first, then race for each under
        // its entity lock; the status/runner check is the CAS that lets at
        // most one concurrent claimer win a given job.
        let mut candidates: Vec<(DateTime<Utc>, Arc<Mutex<JobEntry>>)> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter_map(|e| {
                let entry = e.lock().unwrap();
                (entry.job.status == JobStatus::Queued).then(|| (entry.job.queued_at, e.clone()))
            })
            .collect();
        candidates.sort_by_key(|(queued_at, _)| *queued_at);

        for (_, entry) in candidates {
            let mut entry = entry.lock().unwrap();
            if entry.job.status != JobStatus::Queued || entry.job.runner_id.is_some() {
                continue;
            }
            if !entry.job.tags.iter().all(|t| capabilities.contains(t)) {
                continue;
            }

            entry.job.status = JobStatus::Pending;
            entry.job.runner_id = Some(runner_id.to_string());
            entry.job.pending_at = Some(Utc::now());
            entry.job.resource_version += 1;
            entry.token = Some(token.to_string());
            return Ok(Some(entry.job.clone()));
        }

        Ok(None)
    }

    async fn start(&self, id: Uuid, expected_version: i64) -> Result<Job> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock().unwrap();
        entry.job.resource_version = version::check_and_bump(expected_version, entry.job.resource_version)?;
        entry.job.status = JobStatus::Running;
        entry.job.running_at = Some(Utc::now());
        Ok(entry.job.clone())
    }

    async fn finish(&self, id: Uuid, expected_version: i64, outcome: JobOutcome) -> Result<Job> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock().unwrap();
        entry.job.resource_version = version::check_and_bump(expected_version, entry.job.resource_version)?;
        entry.job.status = JobStatus::Finished;
        entry.job.finished_at = Some(Utc::now());
        entry.job.outcome = Some(outcome);
        Ok(entry.job.clone())
    }

    async fn flag_cancel(&self, id: Uuid, expected_version: i64) -> Result<Job> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock().unwrap();
        entry.job.resource_version = version::check_and_bump(expected_version, entry.job.resource_version)?;
        entry.job.cancel_requested = true;
        Ok(entry.job.clone())
    }

    async fn token_matches(&self, id: Uuid, token: &str) -> Result<bool> {
        let entry = self.entry(id)?;
        let entry = entry.lock().unwrap();
        Ok(entry.token.as_deref() == Some(token))
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// In-memory implementation of [`SessionStore`]
#[derive(Default)]
pub struct MemSessionStore {
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<RunnerSession>>>>,
}

impl MemSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemSessionStore {
    async fn insert(&self, session: &RunnerSession) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&session.id) {
            return Err(Error::Conflict(format!(
                "runner session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, Arc::new(Mutex::new(session.clone())));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RunnerSession>> {
        let entry = self.sessions.lock().unwrap().get(&id).cloned();
        Ok(entry.map(|e| e.lock().unwrap().clone()))
    }

    async fn list(&self, runner_id: Option<&str>) -> Result<Vec<RunnerSession>> {
        let entries: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();

        let mut sessions: Vec<RunnerSession> = entries
            .iter()
            .map(|e| e.lock().unwrap().clone())
            .filter(|s| runner_id.is_none_or(|r| s.runner_id == r))
            .collect();

        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let entry = self.sessions.lock().unwrap().get(&id).cloned();
        match entry {
            Some(entry) => {
                entry.lock().unwrap().last_contact_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_error(&self, id: Uuid) -> Result<Option<RunnerSession>> {
        let entry = self.sessions.lock().unwrap().get(&id).cloned();
        match entry {
            Some(entry) => {
                let mut session = entry.lock().unwrap();
                session.error_count += 1;
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }
}

// =============================================================================
// Logs
// =============================================================================

struct LogEntry {
    data: Vec<u8>,
    completed: bool,
    last_updated_at: DateTime<Utc>,
}

impl LogEntry {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            completed: false,
            last_updated_at: Utc::now(),
        }
    }

    fn record(&self) -> LogRecord {
        LogRecord {
            size: self.data.len() as u64,
            completed: self.completed,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// In-memory implementation of [`LogStore`]
#[derive(Default)]
pub struct MemLogStore {
    streams: Mutex<HashMap<LogStreamKey, Arc<Mutex<LogEntry>>>>,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_or_create(&self, key: &LogStreamKey) -> Arc<Mutex<LogEntry>> {
        let mut streams = self.streams.lock().unwrap();
        streams
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LogEntry::new())))
            .clone()
    }
}

#[async_trait]
impl LogStore for MemLogStore {
    async fn append(&self, key: &LogStreamKey, start_offset: u64, data: &[u8]) -> Result<u64> {
        let entry = {
            let streams = self.streams.lock().unwrap();
            streams.get(key).cloned()
        };

        let entry = match entry {
            Some(entry) => entry,
            None if start_offset == 0 => self.entry_or_create(key),
            None => {
                return Err(Error::Conflict(format!(
                    "append at offset {start_offset} rejected, stream {key} is empty"
                )));
            }
        };

        let mut entry = entry.lock().unwrap();
        if entry.completed {
            return Err(Error::InvalidState(format!(
                "log stream {key} is completed, no further appends accepted"
            )));
        }
        if start_offset != entry.data.len() as u64 {
            return Err(Error::Conflict(format!(
                "append at offset {start_offset} rejected, stream {key} is at size {}",
                entry.data.len()
            )));
        }

        entry.data.extend_from_slice(data);
        entry.last_updated_at = Utc::now();
        Ok(entry.data.len() as u64)
    }

    async fn complete(&self, key: &LogStreamKey) -> Result<(LogRecord, bool)> {
        let entry = self.entry_or_create(key);
        let mut entry = entry.lock().unwrap();
        if entry.completed {
            return Ok((entry.record(), false));
        }
        entry.completed = true;
        entry.last_updated_at = Utc::now();
        Ok((entry.record(), true))
    }

    async fn read(&self, key: &LogStreamKey, offset: u64, limit: u64) -> Result<Vec<u8>> {
        let entry = {
            let streams = self.streams.lock().unwrap();
            streams.get(key).cloned()
        };

        let Some(entry) = entry else {
            return Ok(Vec::new());
        };

        let entry = entry.lock().unwrap();
        let size = entry.data.len() as u64;
        if offset >= size {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(limit).min(size);
        Ok(entry.data[offset as usize..end as usize].to_vec())
    }

    async fn get(&self, key: &LogStreamKey) -> Result<Option<LogRecord>> {
        let entry = self.streams.lock().unwrap().get(key).cloned();
        Ok(entry.map(|e| e.lock().unwrap().record()))
    }
}
