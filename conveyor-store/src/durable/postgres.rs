use async_trait::async_trait;
use conveyor_core::domain::job::JobDefinition;
use conveyor_core::domain::run::JobRun;
use conveyor_core::domain::source::SourceItem;
use conveyor_core::domain::step::StepExecutionRecord;
use sqlx::PgPool;
use uuid::Uuid;

use super::DurableStore;
use crate::error::Result;
use crate::repository;

/// Postgres-backed durable store
#[derive(Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn insert_job(&self, job: &JobDefinition) -> Result<()> {
        repository::job::insert(&self.pool, job).await
    }

    async fn update_job(&self, job: &JobDefinition) -> Result<bool> {
        repository::job::update(&self.pool, job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobDefinition>> {
        repository::job::find_by_id(&self.pool, id).await
    }

    async fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        repository::job::list_all(&self.pool).await
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool> {
        repository::job::delete(&self.pool, id).await
    }

    async fn insert_run(&self, run: &JobRun) -> Result<()> {
        repository::run::insert(&self.pool, run).await
    }

    async fn update_run(&self, run: &JobRun) -> Result<bool> {
        repository::run::update(&self.pool, run).await
    }

    async fn update_running_run(&self, run: &JobRun) -> Result<bool> {
        repository::run::update_running(&self.pool, run).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<JobRun>> {
        repository::run::find_by_id(&self.pool, id).await
    }

    async fn list_runs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobRun>> {
        repository::run::find_by_job(&self.pool, job_id, limit as i64).await
    }

    async fn run_ids(&self, job_id: Uuid) -> Result<Vec<Uuid>> {
        repository::run::find_ids_by_job(&self.pool, job_id).await
    }

    async fn latest_run_cursor(&self, job_id: Uuid) -> Result<Option<String>> {
        repository::run::latest_cursor(&self.pool, job_id).await
    }

    async fn upsert_step(&self, record: &StepExecutionRecord) -> Result<()> {
        repository::step::upsert(&self.pool, record).await
    }

    async fn get_step(&self, composite_id: &str) -> Result<Option<StepExecutionRecord>> {
        repository::step::find_by_composite_id(&self.pool, composite_id).await
    }

    async fn list_steps(&self, run_id: Uuid, limit: usize) -> Result<Vec<StepExecutionRecord>> {
        repository::step::find_by_run(&self.pool, run_id, limit as i64).await
    }

    async fn upsert_source_item(
        &self,
        job_id: Uuid,
        run_id: Uuid,
        item: &SourceItem,
    ) -> Result<bool> {
        repository::item::upsert(&self.pool, job_id, run_id, item).await
    }

    async fn count_source_items(&self, job_id: Uuid) -> Result<u64> {
        let count = repository::item::count_by_job(&self.pool, job_id).await?;
        Ok(count.max(0) as u64)
    }
}
