use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use crucible_domain::{EvaluationId, EventPayload, LifecycleEvent};
use tokio::sync::RwLock;

/// Assigns a monotonic per-evaluation sequence number at publish time, the
/// preferred fix for the event-ordering open question: publisher-side
/// sequencing rather than relying on the bus to order deliveries.
#[derive(Clone, Default)]
pub struct SequenceAllocator {
    counters: Arc<RwLock<HashMap<EvaluationId, Arc<AtomicU64>>>>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn counter_for(&self, id: &EvaluationId) -> Arc<AtomicU64> {
        if let Some(c) = self.counters.read().await.get(id) {
            return c.clone();
        }
        let mut guard = self.counters.write().await;
        guard.entry(id.clone()).or_insert_with(|| Arc::new(AtomicU64::new(0))).clone()
    }

    pub async fn next_event(&self, id: EvaluationId, payload: EventPayload) -> LifecycleEvent {
        let counter = self.counter_for(&id).await;
        let seq = counter.fetch_add(1, Ordering::SeqCst);
        LifecycleEvent::new(id, seq, Utc::now(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_increase_monotonically_per_id() {
        let seq = SequenceAllocator::new();
        let id = EvaluationId::from_string("e1");
        let a = seq.next_event(id.clone(), EventPayload::Queued).await;
        let b = seq.next_event(id.clone(), EventPayload::Provisioning).await;
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
    }

    #[tokio::test]
    async fn different_ids_have_independent_counters() {
        let seq = SequenceAllocator::new();
        let a = seq.next_event(EvaluationId::from_string("a"), EventPayload::Queued).await;
        let b = seq.next_event(EvaluationId::from_string("b"), EventPayload::Queued).await;
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 0);
    }
}
