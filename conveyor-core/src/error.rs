//! Error taxonomy shared by the runner and the orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Conveyor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Where in a step a schema validation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    Config,
    HydratedConfig,
    Input,
    Output,
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Checkpoint::Config => write!(f, "config"),
            Checkpoint::HydratedConfig => write!(f, "hydrated config"),
            Checkpoint::Input => write!(f, "input"),
            Checkpoint::Output => write!(f, "output"),
        }
    }
}

/// Errors that can occur while loading plugins, executing steps or
/// touching the stores and queues
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Bad configuration; never retried
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Plugin could not be found or fetched
    #[error("failed to load plugin '{plugin}': {reason}")]
    Load { plugin: String, reason: String },

    /// Plugin source was fetched but its constructor could not be registered
    #[error("failed to register plugin '{plugin}': {reason}")]
    Register { plugin: String, reason: String },

    /// Plugin `initialize` failed
    #[error("plugin '{plugin}' failed to initialize: {reason}")]
    Initialize {
        plugin: String,
        reason: String,
        retryable: bool,
    },

    /// Data did not match a plugin schema
    #[error("{checkpoint} validation failed for {context}: {}", .errors.join("; "))]
    Validation {
        checkpoint: Checkpoint,
        context: String,
        errors: Vec<String>,
    },

    /// Plugin `execute` failed or produced no output
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Durable store failure
    #[error("database error: {0}")]
    Db(String),

    /// Fast store failure
    #[error("state store error: {0}")]
    State(String),

    #[error("queue error: {0}")]
    Queue(String),

    /// A pipeline step failed; wraps the step's own error
    #[error("step '{step_id}' failed: {source}")]
    Step {
        step_id: String,
        #[source]
        source: Box<Error>,
    },
}

/// Status set exposed to API-facing callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    NotFound,
    Validation,
    Internal,
}

impl Error {
    pub fn load(plugin: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            plugin: plugin.into(),
            reason: reason.to_string(),
        }
    }

    pub fn register(plugin: impl Into<String>, reason: impl ToString) -> Self {
        Self::Register {
            plugin: plugin.into(),
            reason: reason.to_string(),
        }
    }

    pub fn step(step_id: impl Into<String>, source: Error) -> Self {
        Self::Step {
            step_id: step_id.into(),
            source: Box::new(source),
        }
    }

    /// Only gates the loader's in-process initialize retry; queue-level
    /// retries are governed by the queue's own attempt policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Initialize { retryable, .. } => *retryable,
            Error::Step { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Id of the failing step, if this error came out of a pipeline
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Error::Step { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// Innermost error, with step wrappers removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn api_status(&self) -> ApiStatus {
        match self.root() {
            Error::NotFound(_) => ApiStatus::NotFound,
            Error::Validation { .. } | Error::Configuration(_) => ApiStatus::Validation,
            _ => ApiStatus::Internal,
        }
    }
}
