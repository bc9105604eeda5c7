use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back onto a domain type
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for conveyor_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(_) | StoreError::Corrupt(_) => {
                conveyor_core::Error::Db(err.to_string())
            }
            StoreError::Redis(_) | StoreError::Serialization(_) | StoreError::Unavailable(_) => {
                conveyor_core::Error::State(err.to_string())
            }
        }
    }
}
