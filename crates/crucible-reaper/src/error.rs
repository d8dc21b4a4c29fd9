use crucible_domain::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReapError {
    #[error(transparent)]
    Store(#[from] crucible_store::StoreError),

    #[error(transparent)]
    Pool(#[from] crucible_pool::PoolError),
}

impl Classify for ReapError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReapError::Store(e) => e.kind(),
            ReapError::Pool(e) => e.kind(),
        }
    }
}
