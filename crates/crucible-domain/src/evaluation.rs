use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EvaluationId, SandboxId, SlotId};
use crate::status::{Cause, Priority, Status};

/// Captured process output, inlined below the large-output threshold or
/// externalized to the object/file store above it (see operator control
/// `large_output_threshold` in `crucible-config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Inline { data: String },
    Externalized { reference: String, preview: String },
}

impl Output {
    pub fn inline(data: impl Into<String>) -> Self {
        Output::Inline { data: data.into() }
    }

    /// A short, UI-safe rendering regardless of storage mode.
    pub fn preview(&self) -> &str {
        match self {
            Output::Inline { data } => data,
            Output::Externalized { preview, .. } => preview,
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Output::Inline { data: String::new() }
    }
}

/// Which stream a captured log chunk came from. Carried alongside raw
/// bytes from the driver all the way to the ephemeral ring buffer so the
/// two can be stored and externalized separately instead of losing their
/// origin once merged into one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// The central entity: one submission of code from receipt to terminal status.
///
/// Exclusively mutated by the dispatcher/watcher/reconciler/reaper through
/// state-machine-guarded transitions; never by the ambient API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub code: String,
    pub language: String,
    pub priority: Priority,
    pub timeout_secs: u32,
    pub status: Status,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub stdout: Output,
    pub stderr: Output,
    /// −1 if the sandbox never started.
    pub exit_code: i32,
    pub cause: Option<Cause>,

    pub executor_slot: Option<SlotId>,
    pub sandbox_id: Option<SandboxId>,

    pub retry_count: u32,
    pub metadata: serde_json::Value,

    /// Administrative soft-delete flag. Only an explicit purge sets this.
    #[serde(default)]
    pub deleted: bool,
}

impl Evaluation {
    pub fn new(
        code: impl Into<String>,
        language: impl Into<String>,
        priority: Priority,
        timeout_secs: u32,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EvaluationId::new(),
            code: code.into(),
            language: language.into(),
            priority,
            timeout_secs,
            status: Status::Submitted,
            created_at: now,
            started_at: None,
            completed_at: None,
            stdout: Output::default(),
            stderr: Output::default(),
            exit_code: -1,
            cause: None,
            executor_slot: None,
            sandbox_id: None,
            retry_count: 0,
            metadata,
            deleted: false,
        }
    }

    /// `executor_slot` must be non-null iff status ∈ {provisioning, running}.
    /// Cheap self-check used by tests and by the reconciler after a write.
    pub fn slot_invariant_holds(&self) -> bool {
        let expects_slot = matches!(self.status, Status::Provisioning | Status::Running);
        self.executor_slot.is_some() == expects_slot
    }
}
