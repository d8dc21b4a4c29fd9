use async_trait::async_trait;
use crucible_domain::{EvaluationId, EventPayload, LifecycleEvent};
use futures::stream::BoxStream;

use crate::error::BusError;

pub type EventStream = BoxStream<'static, LifecycleEvent>;

/// Delivers lifecycle events from producers (dispatcher, watcher, reaper)
/// to consumers (reconciler, optional streaming endpoints).
///
/// Delivery is at-least-once with best-effort per-id ordering; consumers
/// MUST be idempotent. There is no durable backlog — a bus that loses
/// events relies on the reaper to reconcile.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Assigns the next sequence number for `evaluation_id` and publishes
    /// the resulting event, returning it so callers can log/inspect it.
    async fn publish(&self, evaluation_id: &EvaluationId, payload: EventPayload) -> Result<LifecycleEvent, BusError>;

    async fn subscribe(&self, evaluation_id: &EvaluationId) -> Result<EventStream, BusError>;
}
