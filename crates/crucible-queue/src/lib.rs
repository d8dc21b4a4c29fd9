mod error;
mod memory;
mod queue;
mod redis_queue;
mod task;

pub use error::QueueError;
pub use memory::InMemoryQueue;
pub use queue::TaskQueue;
pub use redis_queue::RedisQueue;
pub use task::{QueueDepth, Task};
