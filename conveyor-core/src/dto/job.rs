//! Job definition DTOs

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::job::JobStatus;
use crate::domain::pipeline::PipelineDefinition;

/// Request to create a job definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobDefinition {
    pub name: String,
    #[serde(default)]
    pub schedule: Option<String>,
    pub source_plugin: String,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub source_config: serde_json::Value,
    #[serde(default)]
    pub source_search: serde_json::Value,
    pub pipeline: PipelineDefinition,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

/// Partial update of a job definition
///
/// `schedule` distinguishes "leave as is" (absent) from "clear" (`null`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateJobDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub schedule: Option<Option<String>>,
    #[serde(default)]
    pub source_plugin: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub source_version: Option<Option<String>>,
    #[serde(default)]
    pub source_config: Option<serde_json::Value>,
    #[serde(default)]
    pub source_search: Option<serde_json::Value>,
    #[serde(default)]
    pub pipeline: Option<PipelineDefinition>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
