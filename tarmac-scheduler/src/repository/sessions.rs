//! Runner session store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tarmac_core::domain::session::RunnerSession;
use tarmac_core::{Error, Result};

/// Repository trait for runner session leases
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &RunnerSession) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<RunnerSession>>;

    /// Lists sessions, optionally restricted to one runner
    async fn list(&self, runner_id: Option<&str>) -> Result<Vec<RunnerSession>>;

    /// Records a heartbeat; returns false when the session is unknown
    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Increments the session error counter; `None` when unknown
    async fn record_error(&self, id: Uuid) -> Result<Option<RunnerSession>>;
}

/// Postgres implementation of [`SessionStore`]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &RunnerSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runner_sessions (id, runner_id, internal, error_count,
                                         created_at, last_contact_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id)
        .bind(&session.runner_id)
        .bind(session.internal)
        .bind(session.error_count)
        .bind(session.created_at)
        .bind(session.last_contact_at)
        .execute(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RunnerSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, runner_id, internal, error_count, created_at, last_contact_at
            FROM runner_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self, runner_id: Option<&str>) -> Result<Vec<RunnerSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, runner_id, internal, error_count, created_at, last_contact_at
            FROM runner_sessions
            WHERE ($1::varchar IS NULL OR runner_id = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(runner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE runner_sessions SET last_contact_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::internal)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_error(&self, id: Uuid) -> Result<Option<RunnerSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE runner_sessions
            SET error_count = error_count + 1
            WHERE id = $1
            RETURNING id, runner_id, internal, error_count, created_at, last_contact_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(row.map(|r| r.into()))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    runner_id: String,
    internal: bool,
    error_count: i32,
    created_at: DateTime<Utc>,
    last_contact_at: DateTime<Utc>,
}

impl From<SessionRow> for RunnerSession {
    fn from(row: SessionRow) -> Self {
        RunnerSession {
            id: row.id,
            runner_id: row.runner_id,
            internal: row.internal,
            error_count: row.error_count,
            created_at: row.created_at,
            last_contact_at: row.last_contact_at,
        }
    }
}
