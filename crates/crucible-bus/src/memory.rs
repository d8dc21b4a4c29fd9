use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use crucible_domain::{EvaluationId, EventPayload, LifecycleEvent};
use tokio::sync::{broadcast, RwLock};

use crate::bus::{EventBus, EventStream};
use crate::error::BusError;
use crate::sequencer::SequenceAllocator;

const CHANNEL_CAPACITY: usize = 256;

/// In-memory [`EventBus`] built on `tokio::sync::broadcast`, one channel
/// per evaluation id created lazily on first publish or subscribe.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    channels: Arc<RwLock<HashMap<EvaluationId, broadcast::Sender<LifecycleEvent>>>>,
    sequencer: SequenceAllocator,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender_for(&self, id: &EvaluationId) -> broadcast::Sender<LifecycleEvent> {
        if let Some(tx) = self.channels.read().await.get(id) {
            return tx.clone();
        }
        let mut guard = self.channels.write().await;
        guard
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, evaluation_id: &EvaluationId, payload: EventPayload) -> Result<LifecycleEvent, BusError> {
        let event = self.sequencer.next_event(evaluation_id.clone(), payload).await;
        let tx = self.sender_for(evaluation_id).await;
        // No subscribers yet is not an error — there is no durable backlog.
        let _ = tx.send(event.clone());
        Ok(event)
    }

    async fn subscribe(&self, evaluation_id: &EvaluationId) -> Result<EventStream, BusError> {
        let mut rx = self.sender_for(evaluation_id).await.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn published_events_carry_increasing_sequence_numbers() {
        let bus = InMemoryBus::new();
        let id = EvaluationId::from_string("e1");
        let mut stream = bus.subscribe(&id).await.unwrap();

        bus.publish(&id, EventPayload::Queued).await.unwrap();
        bus.publish(&id, EventPayload::Provisioning).await.unwrap();

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
    }
}
