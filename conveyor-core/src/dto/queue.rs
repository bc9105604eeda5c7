//! Queue payload DTOs
//!
//! Shapes of the payloads carried by `source-query` and
//! `pipeline-execution` queue jobs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::ExecutionContext;
use crate::domain::source::ResumablePollingState;

pub const SOURCE_QUERY_QUEUE: &str = "source-query";
pub const PIPELINE_EXECUTION_QUEUE: &str = "pipeline-execution";

/// Job name of source-query firings and continuations
pub const SOURCE_QUERY_JOB: &str = "source-query";

/// Job name of per-item pipeline jobs
pub const PIPELINE_ITEM_JOB: &str = "pipeline-item";

const REGISTRATION_PREFIX: &str = "job:";

/// Payload of a source-query job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceQueryPayload {
    pub job_id: Uuid,
    /// Absent on the first invocation of a firing; the worker creates the run
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub resumable_polling_state: Option<ResumablePollingState>,
}

impl SourceQueryPayload {
    pub fn new_run(job_id: Uuid) -> Self {
        Self {
            job_id,
            run_id: None,
            resumable_polling_state: None,
        }
    }
}

/// Payload of a pipeline-execution job (one per discovered item)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecutionPayload {
    pub run_id: Uuid,
    #[serde(default)]
    pub external_id: Option<String>,
    pub item_payload: serde_json::Value,
    pub context: ExecutionContext,
}

/// Repeating-registration id of a job definition
pub fn registration_id(job_id: Uuid) -> String {
    format!("{REGISTRATION_PREFIX}{job_id}")
}

/// Extracts the job id embedded in a registration id
pub fn job_id_from_registration(registration_id: &str) -> Option<Uuid> {
    registration_id
        .strip_prefix(REGISTRATION_PREFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
}
