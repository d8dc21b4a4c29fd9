use std::time::Duration;

use async_trait::async_trait;
use crucible_domain::EvaluationId;

use crate::error::QueueError;
use crate::task::{QueueDepth, Task};

/// Bounded, priority-aware pull interface over whichever broker backs the
/// deployment. Delivery is at-least-once: a `pull`ed task whose visibility
/// timeout expires before `ack` is redelivered, and the dispatcher must
/// tolerate that (the `queued → provisioning` guard makes redelivery a
/// no-op).
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    async fn push(&self, task: Task) -> Result<(), QueueError>;

    /// Pulls the next task in priority order (`high` before `normal`, FIFO
    /// within a band), marking it in-flight for `visibility_timeout`.
    async fn pull(&self, visibility_timeout: Duration) -> Result<Option<Task>, QueueError>;

    async fn ack(&self, evaluation_id: &EvaluationId) -> Result<(), QueueError>;

    /// Returns an in-flight task to its queue immediately, for the
    /// dispatcher's bounded-delay requeue path.
    async fn nack(&self, evaluation_id: &EvaluationId) -> Result<(), QueueError>;

    /// Current per-band and in-flight counts, for the ops surface.
    async fn depth(&self) -> Result<QueueDepth, QueueError>;
}
