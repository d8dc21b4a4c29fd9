use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crucible_domain::{EvaluationId, LifecycleEvent};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::reconcile::Reconciler;

/// Fans incoming events out across a fixed number of shards, each consumed
/// by its own task, so that two events for the same evaluation are always
/// processed in submission order while unrelated evaluations reconcile
/// concurrently.
///
/// The event bus only supports per-evaluation-id subscription, not a single
/// global stream a standalone reconciler process could poll; producers
/// (dispatcher, watcher, reaper) call [`ReconcilerHandle::submit`] directly,
/// immediately after publishing to the bus, so this in-process channel fan-
/// out plays the role the bus can't.
pub struct ReconcilerHandle {
    senders: Vec<mpsc::UnboundedSender<LifecycleEvent>>,
}

impl ReconcilerHandle {
    /// Spawns `shard_count` worker tasks, each draining its own channel
    /// through `reconciler.apply`. Errors from `apply` are logged and do
    /// not stop the shard — one bad event must never wedge the others
    /// queued behind it.
    pub fn spawn(reconciler: Arc<Reconciler>, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut senders = Vec::with_capacity(shard_count);

        for shard in 0..shard_count {
            let (tx, mut rx) = mpsc::unbounded_channel::<LifecycleEvent>();
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Err(e) = reconciler.apply(&event).await {
                        error!(shard, evaluation_id = %event.evaluation_id, error = %e, "reconcile failed");
                    }
                }
            });
            senders.push(tx);
        }

        Self { senders }
    }

    fn shard_for(&self, id: &EvaluationId) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }

    /// Routes `event` to the shard owning `id`. Never blocks; a closed
    /// shard (its worker task panicked) drops the event with a warning
    /// rather than propagating a channel error up through every producer.
    pub fn submit(&self, id: &EvaluationId, event: LifecycleEvent) {
        let shard = self.shard_for(id);
        if self.senders[shard].send(event).is_err() {
            warn!(evaluation_id = %id, shard, "reconciler shard is gone, dropping event");
        }
    }
}
