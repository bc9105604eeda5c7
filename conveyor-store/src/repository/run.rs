//! Job run repository

use chrono::{DateTime, Utc};
use conveyor_core::domain::run::{JobRun, RunStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StoreError};

pub async fn insert(pool: &PgPool, run: &JobRun) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO job_runs (id, job_id, status, started_at, completed_at, error,
                              items_discovered, final_cursor)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(run.id)
    .bind(run.job_id)
    .bind(status_to_string(run.status))
    .bind(run.started_at)
    .bind(run.completed_at)
    .bind(&run.error)
    .bind(run.items_discovered as i64)
    .bind(&run.final_cursor)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update(pool: &PgPool, run: &JobRun) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE job_runs
        SET status = $1, completed_at = $2, error = $3, items_discovered = $4,
            final_cursor = $5
        WHERE id = $6
        "#,
    )
    .bind(status_to_string(run.status))
    .bind(run.completed_at)
    .bind(&run.error)
    .bind(run.items_discovered as i64)
    .bind(&run.final_cursor)
    .bind(run.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Updates a run only while it is still running
pub async fn update_running(pool: &PgPool, run: &JobRun) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE job_runs
        SET status = $1, completed_at = $2, error = $3, items_discovered = $4,
            final_cursor = $5
        WHERE id = $6 AND status = 'running'
        "#,
    )
    .bind(status_to_string(run.status))
    .bind(run.completed_at)
    .bind(&run.error)
    .bind(run.items_discovered as i64)
    .bind(&run.final_cursor)
    .bind(run.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobRun>> {
    let row = sqlx::query_as::<_, JobRunRow>(
        r#"
        SELECT id, job_id, status, started_at, completed_at, error, items_discovered,
               final_cursor
        FROM job_runs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(JobRun::try_from).transpose()
}

/// Runs of a job, newest first
pub async fn find_by_job(pool: &PgPool, job_id: Uuid, limit: i64) -> Result<Vec<JobRun>> {
    let rows = sqlx::query_as::<_, JobRunRow>(
        r#"
        SELECT id, job_id, status, started_at, completed_at, error, items_discovered,
               final_cursor
        FROM job_runs
        WHERE job_id = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#,
    )
    .bind(job_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobRun::try_from).collect()
}

pub async fn find_ids_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM job_runs WHERE job_id = $1")
        .bind(job_id)
        .fetch_all(pool)
        .await?;

    Ok(ids)
}

/// Final cursor of the most recent run that recorded one
pub async fn latest_cursor(pool: &PgPool, job_id: Uuid) -> Result<Option<String>> {
    let cursor = sqlx::query_scalar::<_, String>(
        r#"
        SELECT final_cursor
        FROM job_runs
        WHERE job_id = $1 AND final_cursor IS NOT NULL
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(cursor)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn string_to_status(s: &str) -> Result<RunStatus> {
    match s {
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(StoreError::Corrupt(format!("unknown run status '{}'", other))),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRunRow {
    id: Uuid,
    job_id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    items_discovered: i64,
    final_cursor: Option<String>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = StoreError;

    fn try_from(row: JobRunRow) -> Result<Self> {
        Ok(JobRun {
            id: row.id,
            job_id: row.job_id,
            status: string_to_status(&row.status)?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error: row.error,
            items_discovered: row.items_discovered.max(0) as u64,
            final_cursor: row.final_cursor,
        })
    }
}
