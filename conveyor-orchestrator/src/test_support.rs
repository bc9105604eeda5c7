use conveyor_core::domain::pipeline::{ExecutionMode, PipelineDefinition, StepDefinition};
use conveyor_core::dto::job::CreateJobDefinition;
use conveyor_core::dto::queue::{PIPELINE_EXECUTION_QUEUE, SOURCE_QUERY_QUEUE};
use conveyor_queue::{InMemoryQueueBackend, JobQueueService};
use conveyor_store::{InMemoryDurableStore, InMemoryFastStore, StateSync};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::service::LifecycleManager;

pub fn manager() -> LifecycleManager {
    let state = StateSync::new(
        Arc::new(InMemoryDurableStore::new()),
        Arc::new(InMemoryFastStore::new()),
    );
    let queue = JobQueueService::new(
        Arc::new(InMemoryQueueBackend::new()),
        &[SOURCE_QUERY_QUEUE, PIPELINE_EXECUTION_QUEUE],
    );
    LifecycleManager::new(state, queue, Duration::from_millis(2000))
}

pub fn create_request(schedule: Option<&str>) -> CreateJobDefinition {
    CreateJobDefinition {
        name: "nightly".to_string(),
        schedule: schedule.map(str::to_string),
        source_plugin: "feed".to_string(),
        source_version: None,
        source_config: json!({}),
        source_search: json!({"q": "rust"}),
        pipeline: PipelineDefinition {
            id: Uuid::new_v4(),
            name: "shout".to_string(),
            steps: vec![StepDefinition {
                step_id: "up".to_string(),
                plugin_id: "uppercase".to_string(),
                plugin_version: None,
                config: json!({"prefix": ""}),
            }],
            secrets: Vec::new(),
            mode: ExecutionMode::Sequential,
        },
        status: None,
    }
}
