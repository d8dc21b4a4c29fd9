use crucible_domain::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] crucible_queue::QueueError),

    #[error(transparent)]
    Store(#[from] crucible_store::StoreError),

    #[error(transparent)]
    Bus(#[from] crucible_bus::BusError),

    #[error(transparent)]
    Driver(#[from] crucible_driver::DriverError),

    #[error(transparent)]
    Pool(#[from] crucible_pool::PoolError),

    #[error("evaluation {0} vanished from the durable store between pull and dispatch")]
    EvaluationMissing(String),
}

impl crucible_domain::Classify for DispatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Queue(e) => e.kind(),
            DispatchError::Store(e) => e.kind(),
            DispatchError::Bus(e) => e.kind(),
            DispatchError::Driver(e) => e.kind(),
            DispatchError::Pool(e) => e.kind(),
            DispatchError::EvaluationMissing(_) => ErrorKind::InvariantViolation,
        }
    }
}
