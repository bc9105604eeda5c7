//! Pipeline worker: runs a job's pipeline for one discovered item

use async_trait::async_trait;
use conveyor_core::dto::queue::PipelineExecutionPayload;
use conveyor_core::{Error, Result};
use conveyor_queue::{JobProcessor, QueueJob};
use conveyor_store::StateSync;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::service::PipelineRunner;

pub struct PipelineWorker {
    runner: PipelineRunner,
    state: StateSync,
}

impl PipelineWorker {
    pub fn new(runner: PipelineRunner, state: StateSync) -> Self {
        Self { runner, state }
    }

    /// Runs the pipeline of the item's source job
    ///
    /// Returns `None` when the item was skipped because its run was
    /// cancelled or its job no longer exists.
    pub async fn handle(&self, payload: PipelineExecutionPayload) -> Result<Option<Value>> {
        let ctx = payload.context;
        let job_id = ctx.source_job_id;

        if let Some(run) = self.state.run(job_id, ctx.run_id).await? {
            if run.status == conveyor_core::domain::run::RunStatus::Cancelled {
                info!(%job_id, run_id = %ctx.run_id, item_index = ctx.item_index, "Run cancelled, skipping item");
                return Ok(None);
            }
        }

        let Some(job) = self.state.durable().get_job(job_id).await? else {
            warn!(%job_id, "Job definition no longer exists, dropping item");
            return Ok(None);
        };

        match self.runner.run(&job.pipeline, &ctx, payload.item_payload).await {
            Ok(output) => {
                debug!(
                    %job_id,
                    run_id = %ctx.run_id,
                    item_index = ctx.item_index,
                    external_id = ?payload.external_id,
                    "Item processed"
                );
                Ok(Some(output))
            }
            Err(err) => {
                error!(
                    %job_id,
                    run_id = %ctx.run_id,
                    item_index = ctx.item_index,
                    step_id = ?err.step_id(),
                    "Pipeline failed: {}",
                    err
                );
                if let Err(e) = self.state.cache_error(job_id, Some(ctx.run_id), &err.to_string()).await {
                    warn!(%job_id, "Failed to cache pipeline error: {}", e);
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl JobProcessor for PipelineWorker {
    async fn process(&self, job: &QueueJob) -> Result<()> {
        let payload: PipelineExecutionPayload = job
            .payload_as()
            .map_err(|e| Error::Queue(format!("malformed pipeline-execution payload: {}", e)))?;
        self.handle(payload).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginLoader;
    use crate::service::{SecretSet, StepExecutor};
    use crate::test_support;
    use chrono::Utc;
    use conveyor_core::domain::job::{JobDefinition, JobStatus};
    use conveyor_core::domain::pipeline::{
        ExecutionContext, ExecutionMode, PipelineDefinition, StepDefinition,
    };
    use conveyor_core::domain::run::{JobRun, RunStatus};
    use conveyor_store::{DurableStore, InMemoryDurableStore, InMemoryFastStore};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn setup(plugin_id: &str) -> (PipelineWorker, Arc<InMemoryDurableStore>, StateSync, JobDefinition, JobRun) {
        let durable = Arc::new(InMemoryDurableStore::new());
        let state = StateSync::new(durable.clone(), Arc::new(InMemoryFastStore::new()));
        let loader = PluginLoader::new(test_support::registry(), Arc::new(test_support::fetcher()));
        let executor = StepExecutor::new(Arc::new(loader), state.clone(), Arc::new(SecretSet::new()));

        let now = Utc::now();
        let job = JobDefinition {
            id: Uuid::new_v4(),
            name: "items".to_string(),
            schedule: None,
            source_plugin: "feed".to_string(),
            source_version: None,
            source_config: json!({}),
            source_search: json!({}),
            pipeline: PipelineDefinition {
                id: Uuid::new_v4(),
                name: "one-step".to_string(),
                steps: vec![StepDefinition {
                    step_id: "only".to_string(),
                    plugin_id: plugin_id.to_string(),
                    plugin_version: None,
                    config: json!({"prefix": "> "}),
                }],
                secrets: Vec::new(),
                mode: ExecutionMode::Sequential,
            },
            status: JobStatus::Active,
            created_at: now,
            updated_at: now,
        };
        durable.insert_job(&job).await.unwrap();

        let run = JobRun::start(job.id);
        state.start_run(&run, job.status).await.unwrap();

        let worker = PipelineWorker::new(PipelineRunner::new(Arc::new(executor)), state.clone());
        (worker, durable, state, job, run)
    }

    fn payload(job: &JobDefinition, run: &JobRun) -> PipelineExecutionPayload {
        PipelineExecutionPayload {
            run_id: run.id,
            external_id: Some("a".to_string()),
            item_payload: json!({"text": "alpha"}),
            context: ExecutionContext {
                run_id: run.id,
                item_index: 0,
                source_job_id: job.id,
                secrets: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_item_runs_through_pipeline() {
        let (worker, durable, _, job, run) = setup("uppercase").await;
        let out = worker.handle(payload(&job, &run)).await.unwrap();
        assert_eq!(out, Some(json!({"text": "> ALPHA"})));
        assert_eq!(durable.step_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_item() {
        let (worker, durable, state, job, mut run) = setup("uppercase").await;
        run.status = RunStatus::Cancelled;
        state.save_run(&run, job.status).await.unwrap();

        assert_eq!(worker.handle(payload(&job, &run)).await.unwrap(), None);
        assert_eq!(durable.step_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_cached_and_raised() {
        let (worker, _, state, job, run) = setup("failing").await;
        let err = worker.handle(payload(&job, &run)).await.unwrap_err();
        assert_eq!(err.step_id(), Some("only"));

        let cached = state.cached_error(job.id).await.unwrap().unwrap();
        assert_eq!(cached.run_id, Some(run.id));
        assert!(cached.message.contains("kaput"));
    }

    #[tokio::test]
    async fn test_missing_job_drops_item() {
        let (worker, durable, _, job, run) = setup("uppercase").await;
        durable.delete_job(job.id).await.unwrap();
        assert_eq!(worker.handle(payload(&job, &run)).await.unwrap(), None);
    }
}
