mod dispatch;
mod error;
mod worker;

pub use dispatch::{dispatch_once, DispatchOutcome, Dispatcher};
pub use error::DispatchError;
pub use worker::run;
