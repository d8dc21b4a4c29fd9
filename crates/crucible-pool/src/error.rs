use crucible_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("slot {0} is held by a different evaluation")]
    Conflict(u32),

    #[error("slot {0} is unknown")]
    UnknownSlot(u32),
}

impl crucible_domain::Classify for PoolError {
    fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Conflict(_) | PoolError::UnknownSlot(_) => ErrorKind::InvariantViolation,
        }
    }
}
