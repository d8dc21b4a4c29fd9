use async_trait::async_trait;
use crucible_domain::{EvaluationId, EventPayload, LifecycleEvent};
use deadpool_redis::{redis::AsyncCommands, Pool};
use futures::StreamExt;

use crate::bus::{EventBus, EventStream};
use crate::error::BusError;
use crate::sequencer::SequenceAllocator;

fn channel(id: &EvaluationId) -> String {
    format!("evt:{id}")
}

/// Redis pub/sub-backed [`EventBus`]. Publishing uses the pooled
/// multiplexed connection; subscribing opens a dedicated connection, since
/// a connection in subscriber mode cannot also serve pooled commands.
#[derive(Clone)]
pub struct RedisBus {
    pool: Pool,
    client: redis::Client,
    sequencer: SequenceAllocator,
}

impl RedisBus {
    pub fn new(pool: Pool, client: redis::Client) -> Self {
        Self { pool, client, sequencer: SequenceAllocator::new() }
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, evaluation_id: &EvaluationId, payload: EventPayload) -> Result<LifecycleEvent, BusError> {
        let event = self.sequencer.next_event(evaluation_id.clone(), payload).await;
        let serialized = serde_json::to_string(&event)?;
        let mut conn = self.pool.get().await.map_err(|e| BusError::Redis(e.to_string()))?;
        conn.publish::<_, _, ()>(channel(evaluation_id), serialized)
            .await
            .map_err(|e| BusError::Redis(e.to_string()))?;
        Ok(event)
    }

    async fn subscribe(&self, evaluation_id: &EvaluationId) -> Result<EventStream, BusError> {
        let conn = self.client.get_async_connection().await.map_err(|e| BusError::Redis(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel(evaluation_id)).await.map_err(|e| BusError::Redis(e.to_string()))?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str::<LifecycleEvent>(&payload).ok()
        });
        Ok(Box::pin(stream))
    }
}
