use std::sync::Arc;

use crucible_bus::EventBus;
use crucible_pool::ExecutorPool;
use crucible_queue::TaskQueue;
use crucible_store::DurableStore;

#[derive(Clone)]
pub struct AppState {
    pub durable: Arc<dyn DurableStore>,
    pub pool: Arc<ExecutorPool>,
    pub queue: Arc<dyn TaskQueue>,
    pub bus: Arc<dyn EventBus>,
    pub auth_token: Arc<String>,
}
