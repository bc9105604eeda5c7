//! Pipeline domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline definition
///
/// Embedded in a [`JobDefinition`](crate::domain::job::JobDefinition) and
/// replaced wholesale when the job is updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<StepDefinition>,
    /// Secret names the steps may reference as `{{NAME}}` placeholders
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
}

/// How the steps of a pipeline are sequenced for one item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Declared order, output feeds the next step, fail-fast
    #[default]
    Sequential,
    /// Independent steps over the same input, all-or-nothing
    Parallel,
}

/// One plugin invocation within a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: String,
    pub plugin_id: String,
    #[serde(default)]
    pub plugin_version: Option<String>,
    /// Raw, un-hydrated plugin configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Per-item context threaded through one step invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub item_index: u64,
    /// Job definition that discovered the item
    pub source_job_id: Uuid,
    /// Declared secret names available to the pipeline
    #[serde(default)]
    pub secrets: Vec<String>,
}
