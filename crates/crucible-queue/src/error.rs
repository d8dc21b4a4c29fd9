use crucible_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("task not in flight: {0}")]
    NotInFlight(String),
}

impl crucible_domain::Classify for QueueError {
    fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Redis(_) | QueueError::Pool(_) => ErrorKind::Transient,
            QueueError::Serialization(_) => ErrorKind::InvariantViolation,
            QueueError::NotInFlight(_) => ErrorKind::Validation,
        }
    }
}
