//! Job definition domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::PipelineDefinition;

/// Job definition
///
/// Binds a source plugin (what to discover) to a pipeline (what to do with
/// each discovered item), optionally on a cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: Uuid,
    pub name: String,
    /// Cron expression; `None` means the job runs once on creation
    pub schedule: Option<String>,
    pub source_plugin: String,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub source_config: serde_json::Value,
    #[serde(default)]
    pub source_search: serde_json::Value,
    pub pipeline: PipelineDefinition,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    /// A repeating queue registration is expected for this job
    pub fn wants_registration(&self) -> bool {
        self.is_active() && self.schedule.is_some()
    }
}

/// Job definition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Active => write!(f, "active"),
            JobStatus::Paused => write!(f, "paused"),
        }
    }
}
