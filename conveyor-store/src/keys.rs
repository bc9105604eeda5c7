//! Fast-store key scheme

use uuid::Uuid;

/// Maximum number of entries kept in a job's run history list
pub const RUN_HISTORY_LIMIT: usize = 50;

/// Latest observed state of a job
pub fn job_state(job_id: Uuid) -> String {
    format!("job-state:{job_id}")
}

/// Detail of one run
pub fn job_run(job_id: Uuid, run_id: Uuid) -> String {
    format!("job-run:{job_id}:{run_id}")
}

/// Prefix shared by every run detail key of a job
pub fn job_run_prefix(job_id: Uuid) -> String {
    format!("job-run:{job_id}:")
}

/// Bounded, newest-first list of a job's runs
pub fn job_run_history(job_id: Uuid) -> String {
    format!("job-runs:{job_id}:history")
}

/// Live state of one item within a run
pub fn pipeline_item(run_id: Uuid, item_index: u64) -> String {
    format!("pipeline-item:{run_id}:{item_index}")
}

pub fn pipeline_item_prefix(run_id: Uuid) -> String {
    format!("pipeline-item:{run_id}:")
}

/// Cached last error of a job
pub fn job_error(job_id: Uuid) -> String {
    format!("job-error:{job_id}")
}
