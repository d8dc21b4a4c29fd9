use crucible_domain::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] crucible_store::StoreError),

    #[error(transparent)]
    Pool(#[from] crucible_pool::PoolError),

    #[error("evaluation {0} has no durable record")]
    EvaluationMissing(String),
}

impl Classify for ReconcileError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Store(e) => e.kind(),
            ReconcileError::Pool(e) => e.kind(),
            ReconcileError::EvaluationMissing(_) => ErrorKind::InvariantViolation,
        }
    }
}
