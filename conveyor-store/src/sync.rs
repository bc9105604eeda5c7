//! State synchronizer
//!
//! Every write goes to the durable store first and is mirrored into the
//! fast store second. The two are not transactionally linked: a crash in
//! between leaves the durable side ahead, which is the safe direction since
//! durable is authoritative for history.

use chrono::Utc;
use conveyor_core::domain::job::JobStatus;
use conveyor_core::domain::run::{JobLiveState, JobRun};
use conveyor_core::domain::step::{LiveStepState, StepExecutionRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::durable::DurableStore;
use crate::error::Result;
use crate::fast::FastStore;
use crate::keys;

/// Cached last error of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedError {
    pub run_id: Option<Uuid>,
    pub message: String,
    pub at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct StateSync {
    durable: Arc<dyn DurableStore>,
    fast: Arc<dyn FastStore>,
}

impl StateSync {
    pub fn new(durable: Arc<dyn DurableStore>, fast: Arc<dyn FastStore>) -> Self {
        Self { durable, fast }
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn fast(&self) -> &Arc<dyn FastStore> {
        &self.fast
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Durable upsert, then live mirror; both failures surface
    pub async fn write_step(&self, record: &StepExecutionRecord) -> Result<()> {
        self.durable.upsert_step(record).await?;
        self.mirror_step(record).await
    }

    /// Live mirror only, keyed by run and item
    pub async fn mirror_step(&self, record: &StepExecutionRecord) -> Result<()> {
        let live = LiveStepState::from(record);
        self.fast
            .set(
                &keys::pipeline_item(record.run_id, record.item_index),
                &serde_json::to_value(&live)?,
            )
            .await
    }

    pub async fn live_item(&self, run_id: Uuid, item_index: u64) -> Result<Option<LiveStepState>> {
        self.fast
            .get(&keys::pipeline_item(run_id, item_index))
            .await?
            .map(decode)
            .transpose()
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Records a new run and prepends it to the job's history
    pub async fn start_run(&self, run: &JobRun, job_status: JobStatus) -> Result<()> {
        self.durable.insert_run(run).await?;
        self.fast
            .set(&keys::job_run(run.job_id, run.id), &serde_json::to_value(run)?)
            .await?;
        self.fast
            .push_capped(
                &keys::job_run_history(run.job_id),
                &Value::String(run.id.to_string()),
                keys::RUN_HISTORY_LIMIT,
            )
            .await?;
        self.publish_job_state(&live_state(run, job_status)).await
    }

    pub async fn save_run(&self, run: &JobRun, job_status: JobStatus) -> Result<()> {
        self.durable.update_run(run).await?;
        self.fast
            .set(&keys::job_run(run.job_id, run.id), &serde_json::to_value(run)?)
            .await?;
        self.publish_job_state(&live_state(run, job_status)).await
    }

    /// Saves a run the caller still believes is running; returns false and
    /// leaves every store untouched when it already ended elsewhere
    pub async fn save_running_run(&self, run: &JobRun, job_status: JobStatus) -> Result<bool> {
        if !self.durable.update_running_run(run).await? {
            return Ok(false);
        }
        self.fast
            .set(&keys::job_run(run.job_id, run.id), &serde_json::to_value(run)?)
            .await?;
        self.publish_job_state(&live_state(run, job_status)).await?;
        Ok(true)
    }

    /// Run detail from the fast store, falling back to the durable record
    pub async fn run(&self, job_id: Uuid, run_id: Uuid) -> Result<Option<JobRun>> {
        match self.fast.get(&keys::job_run(job_id, run_id)).await {
            Ok(Some(value)) => return decode(value).map(Some),
            Ok(None) => {}
            Err(e) => warn!(%run_id, "Fast store read failed, using durable record: {}", e),
        }
        self.durable.get_run(run_id).await
    }

    /// Newest-first runs of a job from the live history, or from the durable
    /// store when the history is empty or unreadable
    pub async fn recent_runs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobRun>> {
        match self.runs_from_history(job_id, limit).await {
            Ok(runs) if !runs.is_empty() => return Ok(runs),
            Ok(_) => debug!(%job_id, "Run history empty, reading durable store"),
            Err(e) => warn!(%job_id, "Run history unreadable, reading durable store: {}", e),
        }
        self.durable.list_runs(job_id, limit).await
    }

    async fn runs_from_history(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobRun>> {
        let ids = self.fast.list(&keys::job_run_history(job_id), limit).await?;
        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            let run_id: Uuid = decode(id)?;
            if let Some(value) = self.fast.get(&keys::job_run(job_id, run_id)).await? {
                runs.push(decode(value)?);
            }
        }
        Ok(runs)
    }

    // =========================================================================
    // Job-level live state
    // =========================================================================

    pub async fn publish_job_state(&self, state: &JobLiveState) -> Result<()> {
        self.fast
            .set(&keys::job_state(state.job_id), &serde_json::to_value(state)?)
            .await
    }

    pub async fn job_state(&self, job_id: Uuid) -> Result<Option<JobLiveState>> {
        self.fast
            .get(&keys::job_state(job_id))
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn cache_error(&self, job_id: Uuid, run_id: Option<Uuid>, message: &str) -> Result<()> {
        let cached = CachedError {
            run_id,
            message: message.to_string(),
            at: Utc::now(),
        };
        self.fast
            .set(&keys::job_error(job_id), &serde_json::to_value(&cached)?)
            .await
    }

    pub async fn cached_error(&self, job_id: Uuid) -> Result<Option<CachedError>> {
        self.fast
            .get(&keys::job_error(job_id))
            .await?
            .map(decode)
            .transpose()
    }

    /// Deletes every fast-store key derived from a job: live state, run
    /// history, run details, per-item state and the cached error
    ///
    /// Run ids are read from the durable store, so this must run before the
    /// durable record is deleted.
    pub async fn purge_job(&self, job_id: Uuid) -> Result<u64> {
        let mut removed = 0;
        for run_id in self.durable.run_ids(job_id).await? {
            removed += self
                .fast
                .delete_prefix(&keys::pipeline_item_prefix(run_id))
                .await?;
        }
        removed += self.fast.delete_prefix(&keys::job_run_prefix(job_id)).await?;
        removed += self
            .fast
            .delete(&[
                keys::job_state(job_id),
                keys::job_run_history(job_id),
                keys::job_error(job_id),
            ])
            .await?;
        Ok(removed)
    }
}

fn live_state(run: &JobRun, job_status: JobStatus) -> JobLiveState {
    JobLiveState {
        job_id: run.job_id,
        job_status,
        current_run: Some(run.id),
        run_status: Some(run.status),
        items_discovered: run.items_discovered,
        last_error: run.error.clone(),
        updated_at: Utc::now(),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
