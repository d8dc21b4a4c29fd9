use crucible_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("evaluation not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl crucible_domain::Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::Validation,
            StoreError::Serialization(_) => ErrorKind::InvariantViolation,
            StoreError::Redis(_) | StoreError::Postgres(_) | StoreError::Internal(_) => ErrorKind::Transient,
        }
    }
}
