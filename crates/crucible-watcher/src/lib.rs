mod error;
mod watch;

pub use error::WatcherError;
pub use watch::{watch, WatchConfig};
