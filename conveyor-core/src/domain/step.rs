//! Step execution domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{ExecutionContext, StepDefinition};

/// Durable record of one step invocation for one item
///
/// Keyed by a deterministic composite id so replays overwrite instead of
/// duplicating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub composite_id: String,
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub step_id: String,
    pub item_index: u64,
    pub plugin_id: String,
    pub config: serde_json::Value,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Processing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl StepExecutionRecord {
    /// `runId:stepId:itemIndex`
    pub fn composite_id(run_id: Uuid, step_id: &str, item_index: u64) -> String {
        format!("{run_id}:{step_id}:{item_index}")
    }

    /// Fresh record in `Processing` state
    pub fn processing(
        ctx: &ExecutionContext,
        step: &StepDefinition,
        input: serde_json::Value,
    ) -> Self {
        Self {
            composite_id: Self::composite_id(ctx.run_id, &step.step_id, ctx.item_index),
            run_id: ctx.run_id,
            job_id: ctx.source_job_id,
            step_id: step.step_id.clone(),
            item_index: ctx.item_index,
            plugin_id: step.plugin_id.clone(),
            config: step.config.clone(),
            input,
            output: None,
            error: None,
            status: StepStatus::Processing,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self, output: serde_json::Value) {
        self.status = StepStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.output = None;
        self.completed_at = Some(Utc::now());
    }
}

/// Live mirror of the latest step of an item, kept in the fast store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStepState {
    pub composite_id: String,
    pub run_id: Uuid,
    pub item_index: u64,
    pub step_id: String,
    pub plugin_id: String,
    pub status: StepStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StepExecutionRecord> for LiveStepState {
    fn from(record: &StepExecutionRecord) -> Self {
        Self {
            composite_id: record.composite_id.clone(),
            run_id: record.run_id,
            item_index: record.item_index,
            step_id: record.step_id.clone(),
            plugin_id: record.plugin_id.clone(),
            status: record.status,
            error: record.error.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
            updated_at: Utc::now(),
        }
    }
}
