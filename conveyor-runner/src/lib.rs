//! Conveyor Runner
//!
//! Executes the work the orchestrator schedules:
//! - Source workers drive a source plugin's asynchronous search through
//!   submit, status and results, re-enqueueing themselves between polls and
//!   dispatching one pipeline job per discovered item
//! - Pipeline workers run a job's pipeline for one item, validating and
//!   recording every step
//!
//! Plugins are Lua scripts resolved through a JSON registry, fetched once per
//! location and cached as compiled factories.

pub mod config;
pub mod plugin;
pub mod retry;
pub mod service;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use plugin::{HttpFetcher, PluginLoader, PluginProvider, PluginRegistry};
pub use service::{EnvSecrets, PipelineRunner, SecretProvider, StepExecutor};
pub use worker::{PipelineWorker, PollingOptions, SourceWorker};
