mod bus;
mod error;
mod memory;
mod redis_bus;
mod sequencer;

pub use bus::{EventBus, EventStream};
pub use error::BusError;
pub use memory::InMemoryBus;
pub use redis_bus::RedisBus;
pub use sequencer::SequenceAllocator;
