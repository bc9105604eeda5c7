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
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_definitions (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            schedule VARCHAR(255),
            source_plugin VARCHAR(255) NOT NULL,
            source_version VARCHAR(64),
            source_config JSONB NOT NULL DEFAULT '{}',
            source_search JSONB NOT NULL DEFAULT '{}',
            pipeline JSONB NOT NULL,
            status VARCHAR(20) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_runs (
            id UUID PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES job_definitions(id) ON DELETE CASCADE,
            status VARCHAR(20) NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ,
            error TEXT,
            items_discovered BIGINT NOT NULL DEFAULT 0,
            final_cursor TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS step_executions (
            composite_id TEXT PRIMARY KEY,
            run_id UUID NOT NULL,
            job_id UUID NOT NULL REFERENCES job_definitions(id) ON DELETE CASCADE,
            step_id VARCHAR(255) NOT NULL,
            item_index BIGINT NOT NULL,
            plugin_id VARCHAR(255) NOT NULL,
            config JSONB NOT NULL DEFAULT '{}',
            input JSONB NOT NULL DEFAULT 'null',
            output JSONB,
            error TEXT,
            status VARCHAR(20) NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_items (
            job_id UUID NOT NULL REFERENCES job_definitions(id) ON DELETE CASCADE,
            external_id TEXT NOT NULL,
            run_id UUID NOT NULL,
            payload JSONB NOT NULL DEFAULT 'null',
            first_seen_at TIMESTAMPTZ NOT NULL,
            last_seen_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (job_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_runs_job_id ON job_runs(job_id, started_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_step_executions_run_id ON step_executions(run_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_definitions_status ON job_definitions(status)")
        .execute(pool)
        .await?;

    Ok(())
}
