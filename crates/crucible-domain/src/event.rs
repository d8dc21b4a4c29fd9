use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EvaluationId, SandboxId, SlotId};
use crate::status::Cause;

/// A typed lifecycle message carried on the event bus (C3).
///
/// Dynamic string-tagged events were rejected in favor of exhaustive, per-
/// variant payloads so the reconciler's transition table is statically
/// checkable against every event this system can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Queued,
    Provisioning,
    Running { slot: SlotId, sandbox_id: SandboxId },
    LogChunk { data: Vec<u8> },
    Completed { exit_code: i32 },
    Failed { exit_code: i32, cause: Cause },
    Timeout,
    CancelRequested,
}

/// Every event carries the evaluation id, a monotonic per-id sequence
/// number assigned at the publisher, a wall-clock timestamp, and its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub evaluation_id: EvaluationId,
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl LifecycleEvent {
    pub fn new(evaluation_id: EvaluationId, seq: u64, at: DateTime<Utc>, payload: EventPayload) -> Self {
        Self { evaluation_id, seq, at, payload }
    }
}
