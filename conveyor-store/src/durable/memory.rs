//! In-process durable store for tests and single-process development
//!
//! Mirrors the Postgres semantics that callers rely on: composite-id
//! overwrites, cascade on job delete and first-seen detection for source
//! items. Foreign keys are not enforced.

use async_trait::async_trait;
use conveyor_core::domain::job::JobDefinition;
use conveyor_core::domain::run::{JobRun, RunStatus};
use conveyor_core::domain::source::SourceItem;
use conveyor_core::domain::step::StepExecutionRecord;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::DurableStore;
use crate::error::{Result, StoreError};

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, JobDefinition>,
    runs: HashMap<Uuid, JobRun>,
    steps: HashMap<String, StepExecutionRecord>,
    /// Upsert count per `(job, external id)`
    items: HashMap<(Uuid, String), u32>,
}

#[derive(Default)]
pub struct InMemoryDurableStore {
    tables: Mutex<Tables>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("durable store lock poisoned: {}", e)))
    }

    /// Number of upserts recorded for one external id of a job
    pub fn source_item_upserts(&self, job_id: Uuid, external_id: &str) -> u32 {
        self.tables()
            .ok()
            .and_then(|t| t.items.get(&(job_id, external_id.to_string())).copied())
            .unwrap_or(0)
    }

    /// Total number of step rows, across all runs
    pub fn step_count(&self) -> usize {
        self.tables().map(|t| t.steps.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn insert_job(&self, job: &JobDefinition) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.jobs.contains_key(&job.id) {
            return Err(StoreError::Unavailable(format!(
                "job definition {} already exists",
                job.id
            )));
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &JobDefinition) -> Result<bool> {
        let mut tables = self.tables()?;
        match tables.jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobDefinition>> {
        Ok(self.tables()?.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        let mut jobs: Vec<_> = self.tables()?.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables()?;
        if tables.jobs.remove(&id).is_none() {
            return Ok(false);
        }
        tables.runs.retain(|_, run| run.job_id != id);
        tables.steps.retain(|_, step| step.job_id != id);
        tables.items.retain(|(job_id, _), _| *job_id != id);
        Ok(true)
    }

    async fn insert_run(&self, run: &JobRun) -> Result<()> {
        self.tables()?.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &JobRun) -> Result<bool> {
        let mut tables = self.tables()?;
        match tables.runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_running_run(&self, run: &JobRun) -> Result<bool> {
        let mut tables = self.tables()?;
        match tables.runs.get_mut(&run.id) {
            Some(existing) if existing.status == RunStatus::Running => {
                *existing = run.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<JobRun>> {
        Ok(self.tables()?.runs.get(&id).cloned())
    }

    async fn list_runs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobRun>> {
        let mut runs: Vec<_> = self
            .tables()?
            .runs
            .values()
            .filter(|run| run.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn run_ids(&self, job_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables()?
            .runs
            .values()
            .filter(|run| run.job_id == job_id)
            .map(|run| run.id)
            .collect())
    }

    async fn latest_run_cursor(&self, job_id: Uuid) -> Result<Option<String>> {
        Ok(self
            .tables()?
            .runs
            .values()
            .filter(|run| run.job_id == job_id && run.final_cursor.is_some())
            .max_by_key(|run| run.started_at)
            .and_then(|run| run.final_cursor.clone()))
    }

    async fn upsert_step(&self, record: &StepExecutionRecord) -> Result<()> {
        self.tables()?
            .steps
            .insert(record.composite_id.clone(), record.clone());
        Ok(())
    }

    async fn get_step(&self, composite_id: &str) -> Result<Option<StepExecutionRecord>> {
        Ok(self.tables()?.steps.get(composite_id).cloned())
    }

    async fn list_steps(&self, run_id: Uuid, limit: usize) -> Result<Vec<StepExecutionRecord>> {
        let mut steps: Vec<_> = self
            .tables()?
            .steps
            .values()
            .filter(|step| step.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        steps.truncate(limit);
        Ok(steps)
    }

    async fn upsert_source_item(
        &self,
        job_id: Uuid,
        _run_id: Uuid,
        item: &SourceItem,
    ) -> Result<bool> {
        let mut tables = self.tables()?;
        let upserts = tables
            .items
            .entry((job_id, item.external_id.clone()))
            .or_insert(0);
        *upserts += 1;
        Ok(*upserts == 1)
    }

    async fn count_source_items(&self, job_id: Uuid) -> Result<u64> {
        Ok(self
            .tables()?
            .items
            .keys()
            .filter(|(id, _)| *id == job_id)
            .count() as u64)
    }
}
