//! Step execution repository
//!
//! Writes are keyed by composite id and overwrite in place, so replaying a
//! step leaves exactly one row behind.

use chrono::{DateTime, Utc};
use conveyor_core::domain::step::{StepExecutionRecord, StepStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StoreError};

pub async fn upsert(pool: &PgPool, record: &StepExecutionRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO step_executions (composite_id, run_id, job_id, step_id, item_index,
                                     plugin_id, config, input, output, error, status,
                                     started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (composite_id) DO UPDATE
        SET plugin_id = EXCLUDED.plugin_id,
            config = EXCLUDED.config,
            input = EXCLUDED.input,
            output = EXCLUDED.output,
            error = EXCLUDED.error,
            status = EXCLUDED.status,
            started_at = EXCLUDED.started_at,
            completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(&record.composite_id)
    .bind(record.run_id)
    .bind(record.job_id)
    .bind(&record.step_id)
    .bind(record.item_index as i64)
    .bind(&record.plugin_id)
    .bind(&record.config)
    .bind(&record.input)
    .bind(&record.output)
    .bind(&record.error)
    .bind(status_to_string(record.status))
    .bind(record.started_at)
    .bind(record.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_by_composite_id(
    pool: &PgPool,
    composite_id: &str,
) -> Result<Option<StepExecutionRecord>> {
    let row = sqlx::query_as::<_, StepExecutionRow>(
        r#"
        SELECT composite_id, run_id, job_id, step_id, item_index, plugin_id, config,
               input, output, error, status, started_at, completed_at
        FROM step_executions
        WHERE composite_id = $1
        "#,
    )
    .bind(composite_id)
    .fetch_optional(pool)
    .await?;

    row.map(StepExecutionRecord::try_from).transpose()
}

/// Steps of a run, most recently started first
pub async fn find_by_run(
    pool: &PgPool,
    run_id: Uuid,
    limit: i64,
) -> Result<Vec<StepExecutionRecord>> {
    let rows = sqlx::query_as::<_, StepExecutionRow>(
        r#"
        SELECT composite_id, run_id, job_id, step_id, item_index, plugin_id, config,
               input, output, error, status, started_at, completed_at
        FROM step_executions
        WHERE run_id = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#,
    )
    .bind(run_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(StepExecutionRecord::try_from).collect()
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Processing => "processing",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
    }
}

fn string_to_status(s: &str) -> Result<StepStatus> {
    match s {
        "processing" => Ok(StepStatus::Processing),
        "completed" => Ok(StepStatus::Completed),
        "failed" => Ok(StepStatus::Failed),
        other => Err(StoreError::Corrupt(format!("unknown step status '{}'", other))),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StepExecutionRow {
    composite_id: String,
    run_id: Uuid,
    job_id: Uuid,
    step_id: String,
    item_index: i64,
    plugin_id: String,
    config: serde_json::Value,
    input: serde_json::Value,
    output: Option<serde_json::Value>,
    error: Option<String>,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<StepExecutionRow> for StepExecutionRecord {
    type Error = StoreError;

    fn try_from(row: StepExecutionRow) -> Result<Self> {
        Ok(StepExecutionRecord {
            composite_id: row.composite_id,
            run_id: row.run_id,
            job_id: row.job_id,
            step_id: row.step_id,
            item_index: row.item_index.max(0) as u64,
            plugin_id: row.plugin_id,
            config: row.config,
            input: row.input,
            output: row.output,
            error: row.error,
            status: string_to_status(&row.status)?,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
