//! Runner session domain model
//!
//! A session is the liveness lease held by a connected runner process. It
//! is never actively closed by the scheduler; absence of contact is the
//! only death signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// An ephemeral lease representing a connected runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSession {
    /// Unique identifier for the session
    pub id: Uuid,

    /// Owning runner
    pub runner_id: String,

    /// Whether the session belongs to a platform-managed runner
    pub internal: bool,

    /// Number of operational errors the runner has reported on this session
    pub error_count: i32,

    /// When the session was established
    pub created_at: DateTime<Utc>,

    /// Last time the runner made contact; updated by every heartbeat
    pub last_contact_at: DateTime<Utc>,
}

impl RunnerSession {
    /// Whether the session is still live, derived from its last contact.
    ///
    /// Pure function of `now - last_contact_at` against the threshold; no
    /// stored state, no network round-trip. Staleness is evaluated lazily
    /// on read, so an idle session simply stops reporting active.
    pub fn is_active(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.last_contact_at);
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => elapsed < threshold,
            Err(_) => true,
        }
    }
}
