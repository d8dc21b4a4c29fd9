use crucible_domain::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Store(#[from] crucible_store::StoreError),

    #[error(transparent)]
    Bus(#[from] crucible_bus::BusError),

    #[error(transparent)]
    Driver(#[from] crucible_driver::DriverError),
}

impl Classify for WatcherError {
    fn kind(&self) -> ErrorKind {
        match self {
            WatcherError::Store(e) => e.kind(),
            WatcherError::Bus(e) => e.kind(),
            WatcherError::Driver(e) => e.kind(),
        }
    }
}
