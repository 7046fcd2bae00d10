//! Database pool and schema bootstrap

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL,
            workspace_id UUID NOT NULL,
            job_type VARCHAR(20) NOT NULL,
            status VARCHAR(20) NOT NULL,
            tags JSONB NOT NULL DEFAULT '[]',
            runner_id VARCHAR(255),
            token VARCHAR(255),
            cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
            max_duration_secs BIGINT NOT NULL,
            created_by VARCHAR(255),
            queued_at TIMESTAMPTZ NOT NULL,
            pending_at TIMESTAMPTZ,
            running_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            outcome VARCHAR(20),
            resource_version BIGINT NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create runner sessions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runner_sessions (
            id UUID PRIMARY KEY,
            runner_id VARCHAR(255) NOT NULL,
            internal BOOLEAN NOT NULL DEFAULT FALSE,
            error_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            last_contact_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create log streams table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            stream_kind VARCHAR(10) NOT NULL,
            stream_id UUID NOT NULL,
            data BYTEA NOT NULL DEFAULT ''::bytea,
            size BIGINT NOT NULL DEFAULT 0,
            completed BOOLEAN NOT NULL DEFAULT FALSE,
            last_updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (stream_kind, stream_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for the hot claim and liveness paths
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_workspace_id ON jobs(workspace_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_runner_id ON jobs(runner_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_queued_at ON jobs(queued_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runner_sessions_runner_id ON runner_sessions(runner_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runner_sessions_last_contact ON runner_sessions(last_contact_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
