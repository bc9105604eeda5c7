//! Step executor
//!
//! One step invocation: validate the raw config, hydrate it, validate it
//! again, resolve and initialize the plugin, validate the input, execute,
//! validate the output. The record goes PROCESSING before any of that and
//! ends COMPLETED or FAILED. There is no retry here; re-dispatch belongs to
//! the queue.

use conveyor_core::domain::pipeline::{ExecutionContext, StepDefinition};
use conveyor_core::domain::step::StepExecutionRecord;
use conveyor_core::{Checkpoint, Error, Result};
use conveyor_store::StateSync;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::hydrator::{self, SecretProvider};
use super::validator::validate;
use crate::plugin::PluginProvider;

pub struct StepExecutor {
    plugins: Arc<dyn PluginProvider>,
    state: StateSync,
    secrets: Arc<dyn SecretProvider>,
}

impl StepExecutor {
    pub fn new(
        plugins: Arc<dyn PluginProvider>,
        state: StateSync,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        Self {
            plugins,
            state,
            secrets,
        }
    }

    /// Runs one step for one item and returns the plugin's output
    ///
    /// A failure to record the PROCESSING state in either store aborts the
    /// step before the plugin is touched. Any later failure is recorded as
    /// FAILED in the durable store before it is returned, including a
    /// durable store that refuses the COMPLETED record. Once COMPLETED is
    /// durable, a failed fast-store mirror is only logged.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        input: &Value,
    ) -> Result<Value> {
        let mut record = StepExecutionRecord::processing(ctx, step, input.clone());
        self.state.write_step(&record).await?;

        debug!(
            run_id = %ctx.run_id,
            step_id = %step.step_id,
            item_index = ctx.item_index,
            plugin = %step.plugin_id,
            "Step started"
        );

        let outcome = match self.run(step, ctx, input).await {
            Ok(output) => self.record_completed(&mut record, output).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(output) => {
                info!(
                    run_id = %ctx.run_id,
                    step_id = %step.step_id,
                    item_index = ctx.item_index,
                    "Step completed"
                );
                Ok(output)
            }
            Err(err) => {
                record.fail(err.to_string());
                if let Err(e) = self.state.durable().upsert_step(&record).await {
                    error!(composite_id = %record.composite_id, "Failed to record step failure: {}", e);
                } else if let Err(e) = self.state.mirror_step(&record).await {
                    warn!(composite_id = %record.composite_id, "Failed to mirror step failure: {}", e);
                }
                warn!(
                    run_id = %ctx.run_id,
                    step_id = %step.step_id,
                    item_index = ctx.item_index,
                    "Step failed: {}",
                    err
                );
                Err(err)
            }
        }
    }

    async fn record_completed(&self, record: &mut StepExecutionRecord, output: Value) -> Result<Value> {
        record.complete(output.clone());
        self.state.durable().upsert_step(record).await?;
        if let Err(e) = self.state.mirror_step(record).await {
            warn!(composite_id = %record.composite_id, "Failed to mirror step completion: {}", e);
        }
        Ok(output)
    }

    async fn run(&self, step: &StepDefinition, ctx: &ExecutionContext, input: &Value) -> Result<Value> {
        let meta = self.plugins.metadata(&step.plugin_id)?;
        let context = format!("step '{}' (plugin '{}')", step.step_id, step.plugin_id);

        validate(&meta.config_schema, &step.config, Checkpoint::Config, &context)?;
        let config = hydrator::hydrate(&step.config, &ctx.secrets, self.secrets.as_ref())?;
        validate(&meta.config_schema, &config, Checkpoint::HydratedConfig, &context)?;

        let plugin = self
            .plugins
            .resolve(&step.plugin_id, step.plugin_version.as_deref(), &config)
            .await?;

        validate(&meta.input_schema, input, Checkpoint::Input, &context)?;
        let output = plugin.execute(input).await;

        if let Err(e) = plugin.shutdown().await {
            warn!(plugin = %step.plugin_id, "Plugin shutdown failed: {}", e);
        }

        let output = output?.ok_or_else(|| {
            Error::Execution(format!("{} produced no output", context))
        })?;
        validate(&meta.output_schema, &output, Checkpoint::Output, &context)?;
        Ok(output)
    }
}
