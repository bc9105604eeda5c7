//! Durable store: the system of record for job, run and step history

mod memory;
mod postgres;

pub use memory::InMemoryDurableStore;
pub use postgres::PgDurableStore;

use async_trait::async_trait;
use conveyor_core::domain::job::JobDefinition;
use conveyor_core::domain::run::JobRun;
use conveyor_core::domain::source::SourceItem;
use conveyor_core::domain::step::StepExecutionRecord;
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait DurableStore: Send + Sync {
    // Job definitions

    async fn insert_job(&self, job: &JobDefinition) -> Result<()>;

    /// Returns `false` when no definition with that id exists
    async fn update_job(&self, job: &JobDefinition) -> Result<bool>;

    async fn get_job(&self, id: Uuid) -> Result<Option<JobDefinition>>;

    async fn list_jobs(&self) -> Result<Vec<JobDefinition>>;

    /// Deletes a definition and cascades to its runs, steps and source items
    async fn delete_job(&self, id: Uuid) -> Result<bool>;

    // Runs

    async fn insert_run(&self, run: &JobRun) -> Result<()>;

    async fn update_run(&self, run: &JobRun) -> Result<bool>;

    /// Like `update_run`, but only while the stored run is still running;
    /// returns false once it was completed, failed or cancelled elsewhere
    async fn update_running_run(&self, run: &JobRun) -> Result<bool>;

    async fn get_run(&self, id: Uuid) -> Result<Option<JobRun>>;

    /// Most recent runs of a job, newest first
    async fn list_runs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobRun>>;

    async fn run_ids(&self, job_id: Uuid) -> Result<Vec<Uuid>>;

    /// Final cursor of the job's most recent run that recorded one
    async fn latest_run_cursor(&self, job_id: Uuid) -> Result<Option<String>>;

    // Step executions

    /// Idempotent overwrite keyed by composite id
    async fn upsert_step(&self, record: &StepExecutionRecord) -> Result<()>;

    async fn get_step(&self, composite_id: &str) -> Result<Option<StepExecutionRecord>>;

    /// Steps of a run, most recently started first
    async fn list_steps(&self, run_id: Uuid, limit: usize) -> Result<Vec<StepExecutionRecord>>;

    // Source items

    /// Returns `true` when the external id is new for this job
    async fn upsert_source_item(&self, job_id: Uuid, run_id: Uuid, item: &SourceItem)
    -> Result<bool>;

    async fn count_source_items(&self, job_id: Uuid) -> Result<u64>;
}
