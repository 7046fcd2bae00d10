//! Log stream store
//!
//! Append-only, offset-addressed byte logs. A write at `start_offset` is
//! accepted iff it equals the current size: no gaps, no overwrites. The
//! strict-offset check gives a total order on writes without a separate
//! sequence counter, and lets a runner that crashed mid-write resume by
//! re-querying the size.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tarmac_core::domain::log::{LogRecord, LogStreamKey};
use tarmac_core::{Error, Result};

/// Repository trait for append-only log streams
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Extends the stream with `data`, returning the new size.
    ///
    /// Fails with `Conflict` when `start_offset` is not the current size,
    /// and with `InvalidState` when the stream is already completed.
    async fn append(&self, key: &LogStreamKey, start_offset: u64, data: &[u8]) -> Result<u64>;

    /// Marks the stream completed. Returns the record plus whether this
    /// call performed the transition (false = it was already completed).
    async fn complete(&self, key: &LogStreamKey) -> Result<(LogRecord, bool)>;

    /// Reads up to `limit` bytes starting at `offset`.
    ///
    /// The range is clamped to the stream; an out-of-range offset yields an
    /// empty result, never an error.
    async fn read(&self, key: &LogStreamKey, offset: u64, limit: u64) -> Result<Vec<u8>>;

    /// Current metadata of the stream, if any bytes or a completion mark exist
    async fn get(&self, key: &LogStreamKey) -> Result<Option<LogRecord>>;
}

/// Postgres implementation of [`LogStore`]
pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explains why a conditional append matched nothing
    async fn append_rejection(&self, key: &LogStreamKey, start_offset: u64) -> Error {
        match self.get(key).await {
            Ok(Some(record)) if record.completed => Error::InvalidState(format!(
                "log stream {key} is completed, no further appends accepted"
            )),
            Ok(Some(record)) => Error::Conflict(format!(
                "append at offset {start_offset} rejected, stream {key} is at size {}",
                record.size
            )),
            Ok(None) => Error::Conflict(format!(
                "append at offset {start_offset} rejected, stream {key} is empty"
            )),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn append(&self, key: &LogStreamKey, start_offset: u64, data: &[u8]) -> Result<u64> {
        let offset = i64::try_from(start_offset)
            .map_err(|_| Error::InvalidState(format!("offset {start_offset} out of range")))?;
        let len = data.len() as i64;
        let now = Utc::now();

        let new_size: Option<(i64,)> = if offset == 0 {
            // First write, or a retry against a still-empty stream.
            sqlx::query_as(
                r#"
                INSERT INTO logs (stream_kind, stream_id, data, size, completed, last_updated_at)
                VALUES ($1, $2, $3, $4, FALSE, $5)
                ON CONFLICT (stream_kind, stream_id) DO UPDATE
                SET data = EXCLUDED.data, size = EXCLUDED.size,
                    last_updated_at = EXCLUDED.last_updated_at
                WHERE logs.size = 0 AND NOT logs.completed
                RETURNING size
                "#,
            )
            .bind(key.kind())
            .bind(key.owner_id())
            .bind(data)
            .bind(len)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::internal)?
        } else {
            sqlx::query_as(
                r#"
                UPDATE logs
                SET data = data || $3, size = size + $4, last_updated_at = $5
                WHERE stream_kind = $1 AND stream_id = $2
                  AND size = $6 AND NOT completed
                RETURNING size
                "#,
            )
            .bind(key.kind())
            .bind(key.owner_id())
            .bind(data)
            .bind(len)
            .bind(now)
            .bind(offset)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::internal)?
        };

        match new_size {
            Some((size,)) => Ok(size as u64),
            None => Err(self.append_rejection(key, start_offset).await),
        }
    }

    async fn complete(&self, key: &LogStreamKey) -> Result<(LogRecord, bool)> {
        // Only a not-yet-completed row (or a fresh insert) returns here, so
        // a returned row means this call performed the transition.
        let row: Option<LogRow> = sqlx::query_as(
            r#"
            INSERT INTO logs (stream_kind, stream_id, size, completed, last_updated_at)
            VALUES ($1, $2, 0, TRUE, $3)
            ON CONFLICT (stream_kind, stream_id) DO UPDATE
            SET completed = TRUE, last_updated_at = $3
            WHERE NOT logs.completed
            RETURNING size, completed, last_updated_at
            "#,
        )
        .bind(key.kind())
        .bind(key.owner_id())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        match row {
            Some(row) => Ok((row.into(), true)),
            None => {
                let record = self
                    .get(key)
                    .await?
                    .ok_or_else(|| Error::not_found("log stream", key))?;
                Ok((record, false))
            }
        }
    }

    async fn read(&self, key: &LogStreamKey, offset: u64, limit: u64) -> Result<Vec<u8>> {
        // substring() takes int4; bytea values cannot exceed that range anyway.
        let from = i32::try_from(offset.saturating_add(1)).unwrap_or(i32::MAX);
        let count = i32::try_from(limit).unwrap_or(i32::MAX);

        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT substring(data FROM $3 FOR $4)
            FROM logs
            WHERE stream_kind = $1 AND stream_id = $2
            "#,
        )
        .bind(key.kind())
        .bind(key.owner_id())
        .bind(from)
        .bind(count)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        Ok(row.map(|(data,)| data).unwrap_or_default())
    }

    async fn get(&self, key: &LogStreamKey) -> Result<Option<LogRecord>> {
        let row: Option<LogRow> = sqlx::query_as(
            r#"
            SELECT size, completed, last_updated_at
            FROM logs
            WHERE stream_kind = $1 AND stream_id = $2
            "#,
        )
        .bind(key.kind())
        .bind(key.owner_id())
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
struct LogRow {
    size: i64,
    completed: bool,
    last_updated_at: DateTime<Utc>,
}

impl From<LogRow> for LogRecord {
    fn from(row: LogRow) -> Self {
        LogRecord {
            size: row.size as u64,
            completed: row.completed,
            last_updated_at: row.last_updated_at,
        }
    }
}
