mod error;
mod sweep;
mod worker;

pub use error::ReapError;
pub use sweep::{Reaper, SweepReport};
pub use worker::run;
