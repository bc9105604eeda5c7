//! Source item repository
//!
//! One row per `(job, external id)`: the dedup ledger of everything a job's
//! source has ever discovered.

use chrono::Utc;
use conveyor_core::domain::source::SourceItem;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// Inserts or refreshes an item; returns `true` when it was seen for the first time
pub async fn upsert(pool: &PgPool, job_id: Uuid, run_id: Uuid, item: &SourceItem) -> Result<bool> {
    let now = Utc::now();

    let inserted = sqlx::query_scalar::<_, bool>(
        r#"
        INSERT INTO source_items (job_id, external_id, run_id, payload, first_seen_at, last_seen_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        ON CONFLICT (job_id, external_id) DO UPDATE
        SET run_id = EXCLUDED.run_id,
            payload = EXCLUDED.payload,
            last_seen_at = EXCLUDED.last_seen_at
        RETURNING (xmax = 0)
        "#,
    )
    .bind(job_id)
    .bind(&item.external_id)
    .bind(run_id)
    .bind(&item.payload)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(inserted)
}

pub async fn count_by_job(pool: &PgPool, job_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM source_items WHERE job_id = $1")
        .bind(job_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}
