//! Queue processors: source polling and per-item pipeline execution

mod pipeline;
mod source;

pub use pipeline::PipelineWorker;
pub use source::{Attempt, PollOutcome, PollingOptions, SourceWorker};

fn encode<T: serde::Serialize>(value: &T) -> conveyor_core::Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| conveyor_core::Error::Queue(format!("cannot encode payload: {}", e)))
}
