use crucible_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("channel closed")]
    Closed,
}

impl crucible_domain::Classify for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            BusError::Redis(_) | BusError::Closed => ErrorKind::Transient,
            BusError::Serialization(_) => ErrorKind::InvariantViolation,
        }
    }
}
