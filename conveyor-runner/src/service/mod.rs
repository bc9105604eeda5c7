//! Step-level services: hydration, validation, execution and sequencing

pub mod executor;
pub mod hydrator;
pub mod pipeline;
pub mod validator;

pub use executor::StepExecutor;
pub use hydrator::{EnvSecrets, SecretProvider, SecretSet};
pub use pipeline::PipelineRunner;
