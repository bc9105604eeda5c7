//! Job definition repository

use chrono::{DateTime, Utc};
use conveyor_core::domain::job::{JobDefinition, JobStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StoreError};

pub async fn insert(pool: &PgPool, job: &JobDefinition) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO job_definitions (id, name, schedule, source_plugin, source_version,
                                     source_config, source_search, pipeline, status,
                                     created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(job.id)
    .bind(&job.name)
    .bind(&job.schedule)
    .bind(&job.source_plugin)
    .bind(&job.source_version)
    .bind(&job.source_config)
    .bind(&job.source_search)
    .bind(serde_json::to_value(&job.pipeline)?)
    .bind(status_to_string(job.status))
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replaces every mutable column of an existing definition
pub async fn update(pool: &PgPool, job: &JobDefinition) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE job_definitions
        SET name = $1, schedule = $2, source_plugin = $3, source_version = $4,
            source_config = $5, source_search = $6, pipeline = $7, status = $8,
            updated_at = $9
        WHERE id = $10
        "#,
    )
    .bind(&job.name)
    .bind(&job.schedule)
    .bind(&job.source_plugin)
    .bind(&job.source_version)
    .bind(&job.source_config)
    .bind(&job.source_search)
    .bind(serde_json::to_value(&job.pipeline)?)
    .bind(status_to_string(job.status))
    .bind(job.updated_at)
    .bind(job.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobDefinition>> {
    let row = sqlx::query_as::<_, JobDefinitionRow>(
        r#"
        SELECT id, name, schedule, source_plugin, source_version, source_config,
               source_search, pipeline, status, created_at, updated_at
        FROM job_definitions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(JobDefinition::try_from).transpose()
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<JobDefinition>> {
    let rows = sqlx::query_as::<_, JobDefinitionRow>(
        r#"
        SELECT id, name, schedule, source_plugin, source_version, source_config,
               source_search, pipeline, status, created_at, updated_at
        FROM job_definitions
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobDefinition::try_from).collect()
}

/// Deletes a definition; runs, steps and source items go with it
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM job_definitions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Active => "active",
        JobStatus::Paused => "paused",
    }
}

fn string_to_status(s: &str) -> Result<JobStatus> {
    match s {
        "active" => Ok(JobStatus::Active),
        "paused" => Ok(JobStatus::Paused),
        other => Err(StoreError::Corrupt(format!("unknown job status '{}'", other))),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobDefinitionRow {
    id: Uuid,
    name: String,
    schedule: Option<String>,
    source_plugin: String,
    source_version: Option<String>,
    source_config: serde_json::Value,
    source_search: serde_json::Value,
    pipeline: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobDefinitionRow> for JobDefinition {
    type Error = StoreError;

    fn try_from(row: JobDefinitionRow) -> Result<Self> {
        Ok(JobDefinition {
            id: row.id,
            name: row.name,
            schedule: row.schedule,
            source_plugin: row.source_plugin,
            source_version: row.source_version,
            source_config: row.source_config,
            source_search: row.source_search,
            pipeline: serde_json::from_value(row.pipeline)?,
            status: string_to_status(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
