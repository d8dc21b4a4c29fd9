use chrono::{DateTime, Utc};
use crucible_domain::{EvaluationId, Priority};
use serde::{Deserialize, Serialize};

/// One unit of dispatcher work: "go try to start this evaluation".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub evaluation_id: EvaluationId,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(evaluation_id: EvaluationId, priority: Priority) -> Self {
        Self { evaluation_id, priority, enqueued_at: Utc::now() }
    }
}

/// Per-band and in-flight counts, surfaced by the ops HTTP API's `GET /queue`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub high: u64,
    pub normal: u64,
    pub in_flight: u64,
}
