//! Pipeline runner: sequences the steps of a pipeline for one item

use conveyor_core::domain::pipeline::{ExecutionContext, ExecutionMode, PipelineDefinition, StepDefinition};
use conveyor_core::{Error, Result};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::executor::StepExecutor;

#[derive(Clone)]
pub struct PipelineRunner {
    executor: Arc<StepExecutor>,
}

impl PipelineRunner {
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        Self { executor }
    }

    /// Runs the pipeline in its declared mode
    ///
    /// Errors are wrapped with the id of the failing step.
    pub async fn run(
        &self,
        pipeline: &PipelineDefinition,
        ctx: &ExecutionContext,
        input: Value,
    ) -> Result<Value> {
        debug!(
            run_id = %ctx.run_id,
            item_index = ctx.item_index,
            pipeline = %pipeline.name,
            steps = pipeline.steps.len(),
            mode = ?pipeline.mode,
            "Running pipeline"
        );

        match pipeline.mode {
            ExecutionMode::Sequential => self.run_sequential(&pipeline.steps, ctx, input).await,
            ExecutionMode::Parallel => self
                .run_parallel(&pipeline.steps, ctx, &input)
                .await
                .map(Value::Array),
        }
    }

    /// Feeds each step's output into the next; stops at the first failure
    pub async fn run_sequential(
        &self,
        steps: &[StepDefinition],
        ctx: &ExecutionContext,
        input: Value,
    ) -> Result<Value> {
        let mut current = input;
        for step in steps {
            current = self
                .executor
                .execute(step, ctx, &current)
                .await
                .map_err(|e| Error::step(&step.step_id, e))?;
        }
        Ok(current)
    }

    /// Runs every step against the same input at once
    ///
    /// Outputs come back in declared order. Every branch runs to completion
    /// so each step ends with a terminal record; one failing branch then
    /// fails the whole call and no outputs are returned.
    pub async fn run_parallel(
        &self,
        steps: &[StepDefinition],
        ctx: &ExecutionContext,
        input: &Value,
    ) -> Result<Vec<Value>> {
        let results = join_all(steps.iter().map(|step| self.executor.execute(step, ctx, input))).await;

        // Every branch has settled; report the first failure in declared order
        steps
            .iter()
            .zip(results)
            .map(|(step, result)| result.map_err(|e| Error::step(&step.step_id, e)))
            .collect()
    }
}
