//! Monitoring reads: the view upstream dashboards assemble for a job

use conveyor_core::domain::job::JobDefinition;
use conveyor_core::domain::run::{JobLiveState, JobRun};
use conveyor_core::domain::step::StepExecutionRecord;
use conveyor_core::{Error, Result};
use conveyor_store::{CachedError, StateSync};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

pub const RECENT_RUNS_LIMIT: usize = 10;
pub const RECENT_STEPS_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct JobOverview {
    pub job: JobDefinition,
    pub live_state: Option<JobLiveState>,
    pub last_error: Option<CachedError>,
    /// Newest first
    pub recent_runs: Vec<JobRun>,
    /// Steps of the latest run
    pub recent_steps: Vec<StepExecutionRecord>,
}

/// Assembles the overview of one job
///
/// Live values come from the fast store and are left out when it cannot be
/// read; the durable job record is required.
pub async fn job_overview(state: &StateSync, job_id: Uuid) -> Result<JobOverview> {
    let job = state
        .durable()
        .get_job(job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

    let live_state = state.job_state(job_id).await.unwrap_or_else(|e| {
        warn!(%job_id, "Live state unreadable: {}", e);
        None
    });
    let last_error = state.cached_error(job_id).await.unwrap_or_else(|e| {
        warn!(%job_id, "Cached error unreadable: {}", e);
        None
    });

    let recent_runs = state.recent_runs(job_id, RECENT_RUNS_LIMIT).await?;
    let recent_steps = match recent_runs.first() {
        Some(run) => state.durable().list_steps(run.id, RECENT_STEPS_LIMIT).await?,
        None => Vec::new(),
    };

    Ok(JobOverview {
        job,
        live_state,
        last_error,
        recent_runs,
        recent_steps,
    })
}
