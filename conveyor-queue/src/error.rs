use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Transport-level queue failures
///
/// Soft failures (removing an active job and the like) are not errors; they
/// come back as `QueueOutcome::Rejected`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("queue backend unavailable: {0}")]
    Unavailable(String),
}

impl From<QueueError> for conveyor_core::Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidCron { .. } => conveyor_core::Error::Configuration(err.to_string()),
            _ => conveyor_core::Error::Queue(err.to_string()),
        }
    }
}
