use std::sync::Arc;

use async_trait::async_trait;
use crucible_bus::{BusError, EventBus, EventStream};
use crucible_domain::{EvaluationId, EventPayload, LifecycleEvent};

use crate::handle::ReconcilerHandle;

/// Wraps a real [`EventBus`] so that every event a producer publishes is
/// also routed to a [`ReconcilerHandle`], in the same call.
///
/// `EventBus` has no global stream a standalone reconciler could poll
/// (see its own doc comment), so something has to hand each published
/// event to the reconciler at the point of publication. Rather than
/// thread a handle through `dispatch_once`/`watch`/the reaper, this
/// decorates the bus they already hold — plugging in transparently
/// wherever those call sites take an `Arc<dyn EventBus>`.
pub struct ReconcilingBus {
    inner: Arc<dyn EventBus>,
    handle: Arc<ReconcilerHandle>,
}

impl ReconcilingBus {
    pub fn new(inner: Arc<dyn EventBus>, handle: Arc<ReconcilerHandle>) -> Self {
        Self { inner, handle }
    }
}

#[async_trait]
impl EventBus for ReconcilingBus {
    async fn publish(&self, evaluation_id: &EvaluationId, payload: EventPayload) -> Result<LifecycleEvent, BusError> {
        let event = self.inner.publish(evaluation_id, payload).await?;
        self.handle.submit(evaluation_id, event.clone());
        Ok(event)
    }

    async fn subscribe(&self, evaluation_id: &EvaluationId) -> Result<EventStream, BusError> {
        self.inner.subscribe(evaluation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crucible_domain::{Evaluation, Priority, Status};
    use crucible_pool::ExecutorPool;
    use crucible_statemachine::TransitionTable;
    use crucible_store::{DurableStore, InMemoryDurableStore, InMemoryEphemeralStore, OutputStore};

    #[tokio::test]
    async fn publishing_through_the_fanout_bus_also_reconciles() {
        let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::default());
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        eval.status = Status::Queued;
        durable.upsert_evaluation(&eval).await.unwrap();

        let reconciler = Arc::new(crate::Reconciler {
            durable: durable.clone(),
            ephemeral: Arc::new(InMemoryEphemeralStore::default()),
            pool: Arc::new(ExecutorPool::new(1)),
            table: Arc::new(TransitionTable::default_table()),
            outputs: Arc::new(OutputStore::new(std::env::temp_dir(), 1024)),
        });
        let handle = Arc::new(ReconcilerHandle::spawn(reconciler, 2));
        let bus = ReconcilingBus::new(Arc::new(crucible_bus::InMemoryBus::new()), handle);

        bus.publish(&eval.id, EventPayload::Provisioning).await.unwrap();

        for _ in 0..50 {
            if durable.get_evaluation(&eval.id).await.unwrap().unwrap().status == Status::Provisioning {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("event was never applied");
    }
}
