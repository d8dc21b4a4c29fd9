pub mod durable;
pub mod ephemeral;
mod error;
mod output_store;

pub use durable::memory::InMemoryDurableStore;
pub use durable::postgres::PostgresDurableStore;
pub use durable::DurableStore;
pub use ephemeral::memory::InMemoryEphemeralStore;
pub use ephemeral::redis_backed::RedisEphemeralStore;
pub use ephemeral::{EphemeralStore, RunningRecord};
pub use error::StoreError;
pub use output_store::OutputStore;
