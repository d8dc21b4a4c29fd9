use std::sync::Arc;

use chrono::Utc;
use crucible_domain::{Evaluation, EventPayload, LifecycleEvent, OutputStream, Status};
use crucible_pool::ExecutorPool;
use crucible_statemachine::TransitionTable;
use crucible_store::{DurableStore, EphemeralStore, OutputStore};
use tracing::{info, warn};

use crate::error::ReconcileError;

/// The target status a [`crucible_domain::EventPayload`] drives toward, if any.
///
/// `LogChunk` never drives a status change — the watcher already persisted
/// it to the ephemeral ring buffer before publishing. `CancelRequested`
/// only drives a transition when no watcher is present to race with: once
/// a sandbox is running, cancellation goes through the driver's `kill`
/// instead, so the reconciler leaves `running` alone here.
fn target_status(current: Status, payload: &EventPayload) -> Option<Status> {
    match payload {
        EventPayload::Queued => Some(Status::Queued),
        EventPayload::Provisioning => Some(Status::Provisioning),
        EventPayload::Running { .. } => Some(Status::Running),
        EventPayload::Completed { .. } => Some(Status::Completed),
        EventPayload::Failed { .. } => Some(Status::Failed),
        EventPayload::Timeout => Some(Status::Timeout),
        EventPayload::LogChunk { .. } => None,
        EventPayload::CancelRequested => (current == Status::Queued).then_some(Status::Cancelled),
    }
}

/// Outcome of folding one event into the current durable record, before any
/// I/O happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event drove a real transition; carries the new status.
    Applied(Status),
    /// The event's payload doesn't correspond to a status change
    /// (`log_chunk`, or a `cancel_requested` that arrived once a watcher
    /// already owns the sandbox).
    Ignored,
    /// The proposed transition exactly repeats the record's current
    /// status — a duplicate delivery of an already-applied event.
    DroppedDuplicate,
    /// The proposed transition is not allowed from the record's current
    /// status by the transition table (typically a stale/out-of-order
    /// event racing a terminal one).
    DroppedInvalidTransition { reason: String },
}

/// Pure decision step: given the evaluation's current status
/// and an incoming event, decide what should happen. No I/O, no clock
/// reads beyond what the caller already captured in the event — this is
/// the function unit tests exercise directly, without standing up stores.
pub fn reconcile_event(current: Status, payload: &EventPayload, table: &TransitionTable) -> ReconcileOutcome {
    let Some(target) = target_status(current, payload) else {
        return ReconcileOutcome::Ignored;
    };

    if current == target {
        return ReconcileOutcome::DroppedDuplicate;
    }

    let (ok, reason) = table.validate_transition(current, target);
    if !ok {
        return ReconcileOutcome::DroppedInvalidTransition {
            reason: reason.unwrap_or_else(|| "rejected".to_string()),
        };
    }

    ReconcileOutcome::Applied(target)
}

/// Everything `apply` needs to turn a decided [`ReconcileOutcome`] into
/// durable state and side effects.
pub struct Reconciler {
    pub durable: Arc<dyn DurableStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub pool: Arc<ExecutorPool>,
    pub table: Arc<TransitionTable>,
    pub outputs: Arc<OutputStore>,
}

impl Reconciler {
    /// Folds one [`LifecycleEvent`] into durable state via a five-step
    /// algorithm:
    ///
    /// 1. load the current durable record
    /// 2. decide via [`reconcile_event`]
    /// 3. on an invalid transition, drop and log at warning
    /// 4. on a real transition, write the updated record
    /// 5. only once that write has succeeded, release the slot and clear
    ///    ephemeral state if the new status is terminal — deliberately
    ///    ordered after the durable write so a crash between the two is
    ///    recoverable by the reaper rather than losing the transition.
    pub async fn apply(&self, event: &LifecycleEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let mut record = self
            .durable
            .get_evaluation(&event.evaluation_id)
            .await?
            .ok_or_else(|| ReconcileError::EvaluationMissing(event.evaluation_id.to_string()))?;

        let outcome = reconcile_event(record.status, &event.payload, &self.table);

        match &outcome {
            ReconcileOutcome::Ignored => {}
            ReconcileOutcome::DroppedDuplicate => {
                info!(evaluation_id = %event.evaluation_id, status = %record.status, "dropped duplicate event");
            }
            ReconcileOutcome::DroppedInvalidTransition { reason } => {
                warn!(evaluation_id = %event.evaluation_id, reason, "dropped event with an invalid transition");
            }
            ReconcileOutcome::Applied(target) => {
                self.populate_terminal_fields(&mut record, &event.payload).await?;
                record.status = *target;
                if *target == Status::Running {
                    record.started_at.get_or_insert(event.at);
                }
                if self.table.is_terminal(*target) {
                    record.completed_at = Some(event.at);
                }

                self.durable.upsert_evaluation(&record).await?;

                if self.table.is_terminal(*target) {
                    if let Some(slot) = record.executor_slot {
                        self.pool.release(slot, &record.id).await?;
                    }
                    self.ephemeral.delete_running(&record.id).await?;
                    self.ephemeral.clear_pending(&record.id).await?;
                }

                info!(evaluation_id = %event.evaluation_id, from = ?record.status, to = %target, "applied transition");
            }
        }

        Ok(outcome)
    }

    /// Fills in the fields an event payload carries that the durable record
    /// doesn't get from the transition alone: the slot/sandbox id on
    /// `running`, and exit code/cause plus externalized logs on a terminal
    /// event. Output externalization happens here, not in the watcher,
    /// because only the reconciler has both the buffered logs and the
    /// durable record in hand at the same time.
    async fn populate_terminal_fields(&self, record: &mut Evaluation, payload: &EventPayload) -> Result<(), ReconcileError> {
        match payload {
            EventPayload::Running { slot, sandbox_id } => {
                record.executor_slot = Some(*slot);
                record.sandbox_id = Some(sandbox_id.clone());
            }
            EventPayload::Completed { exit_code } => {
                record.exit_code = *exit_code;
                record.cause = Some(crucible_domain::Cause::from_exit_code(*exit_code));
                self.externalize_logs(record).await?;
            }
            EventPayload::Failed { exit_code, cause } => {
                record.exit_code = *exit_code;
                record.cause = Some(cause.clone());
                self.externalize_logs(record).await?;
            }
            EventPayload::Timeout => {
                record.cause = Some(crucible_domain::Cause::Timeout);
                self.externalize_logs(record).await?;
            }
            EventPayload::CancelRequested => {
                record.cause = Some(crucible_domain::Cause::Cancelled);
            }
            EventPayload::Queued | EventPayload::Provisioning | EventPayload::LogChunk { .. } => {}
        }
        Ok(())
    }

    async fn externalize_logs(&self, record: &mut Evaluation) -> Result<(), ReconcileError> {
        let stdout = self.ephemeral.read_logs(&record.id, OutputStream::Stdout).await?;
        if !stdout.is_empty() {
            record.stdout = self.outputs.store(record.id.as_str(), "stdout", &stdout).await?;
        }
        let stderr = self.ephemeral.read_logs(&record.id, OutputStream::Stderr).await?;
        if !stderr.is_empty() {
            record.stderr = self.outputs.store(record.id.as_str(), "stderr", &stderr).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_domain::{Cause, EvaluationId, Priority, SandboxId, SlotId};
    use crucible_store::{InMemoryDurableStore, InMemoryEphemeralStore};

    fn table() -> TransitionTable {
        TransitionTable::default_table()
    }

    #[test]
    fn queued_to_provisioning_is_applied() {
        let outcome = reconcile_event(Status::Queued, &EventPayload::Provisioning, &table());
        assert_eq!(outcome, ReconcileOutcome::Applied(Status::Provisioning));
    }

    #[test]
    fn log_chunk_is_always_ignored() {
        let outcome = reconcile_event(Status::Running, &EventPayload::LogChunk { data: vec![1, 2] }, &table());
        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[test]
    fn cancel_requested_while_queued_is_applied_as_cancelled() {
        let outcome = reconcile_event(Status::Queued, &EventPayload::CancelRequested, &table());
        assert_eq!(outcome, ReconcileOutcome::Applied(Status::Cancelled));
    }

    #[test]
    fn cancel_requested_once_running_is_ignored_here() {
        let outcome = reconcile_event(Status::Running, &EventPayload::CancelRequested, &table());
        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[test]
    fn repeating_the_current_status_is_a_duplicate() {
        let outcome = reconcile_event(Status::Running, &EventPayload::Running { slot: SlotId(1), sandbox_id: SandboxId("s".into()) }, &table());
        assert_eq!(outcome, ReconcileOutcome::DroppedDuplicate);
    }

    #[test]
    fn out_of_order_running_after_completed_is_an_invalid_transition() {
        let outcome = reconcile_event(Status::Completed, &EventPayload::Running { slot: SlotId(1), sandbox_id: SandboxId("s".into()) }, &table());
        assert!(matches!(outcome, ReconcileOutcome::DroppedInvalidTransition { .. }));
    }

    fn reconciler() -> (Reconciler, Arc<dyn DurableStore>) {
        let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::default());
        let ephemeral: Arc<dyn EphemeralStore> = Arc::new(InMemoryEphemeralStore::default());
        let pool = Arc::new(ExecutorPool::new(2));
        let outputs = Arc::new(OutputStore::new(std::env::temp_dir(), 1024 * 1024));
        let reconciler = Reconciler {
            durable: durable.clone(),
            ephemeral,
            pool,
            table: Arc::new(table()),
            outputs,
        };
        (reconciler, durable)
    }

    fn event(evaluation_id: EvaluationId, seq: u64, payload: EventPayload) -> LifecycleEvent {
        LifecycleEvent::new(evaluation_id, seq, Utc::now(), payload)
    }

    #[tokio::test]
    async fn applying_running_then_completed_releases_the_slot() {
        let (reconciler, durable) = reconciler();
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        eval.status = Status::Provisioning;
        let slot = reconciler.pool.try_reserve(&eval.id).await.unwrap();
        durable.upsert_evaluation(&eval).await.unwrap();

        reconciler
            .apply(&event(eval.id.clone(), 1, EventPayload::Running { slot, sandbox_id: SandboxId("sbx-1".into()) }))
            .await
            .unwrap();
        let running = durable.get_evaluation(&eval.id).await.unwrap().unwrap();
        assert_eq!(running.status, Status::Running);
        assert!(running.slot_invariant_holds());

        reconciler.apply(&event(eval.id.clone(), 2, EventPayload::Completed { exit_code: 0 })).await.unwrap();
        let completed = durable.get_evaluation(&eval.id).await.unwrap().unwrap();
        assert_eq!(completed.status, Status::Completed);
        assert_eq!(completed.cause, Some(Cause::Ok));

        let snapshot = reconciler.pool.snapshot().await;
        assert_eq!(snapshot.get(&slot).unwrap(), &None);
    }

    #[tokio::test]
    async fn applying_the_same_terminal_event_twice_is_idempotent() {
        let (reconciler, durable) = reconciler();
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        eval.status = Status::Running;
        durable.upsert_evaluation(&eval).await.unwrap();

        let e = event(eval.id.clone(), 1, EventPayload::Completed { exit_code: 0 });
        let first = reconciler.apply(&e).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Applied(Status::Completed)));

        let second = reconciler.apply(&e).await.unwrap();
        assert_eq!(second, ReconcileOutcome::DroppedDuplicate);
    }

    #[tokio::test]
    async fn failed_evaluation_externalizes_both_stdout_and_stderr() {
        let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::default());
        let ephemeral = Arc::new(InMemoryEphemeralStore::default());
        let pool = Arc::new(ExecutorPool::new(2));
        let outputs = Arc::new(OutputStore::new(std::env::temp_dir(), 1024 * 1024));
        let reconciler = Reconciler {
            durable: durable.clone(),
            ephemeral: ephemeral.clone(),
            pool,
            table: Arc::new(table()),
            outputs,
        };

        let mut eval = Evaluation::new("1/0", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        eval.status = Status::Running;
        durable.upsert_evaluation(&eval).await.unwrap();
        ephemeral.append_logs(&eval.id, OutputStream::Stdout, b"partial\n", 4096).await.unwrap();
        ephemeral.append_logs(&eval.id, OutputStream::Stderr, b"ZeroDivisionError\n", 4096).await.unwrap();

        let e = event(eval.id.clone(), 1, EventPayload::Failed { exit_code: 1, cause: Cause::GenericError });
        reconciler.apply(&e).await.unwrap();

        let record = durable.get_evaluation(&eval.id).await.unwrap().unwrap();
        assert_eq!(record.stdout.preview(), "partial\n");
        assert_eq!(record.stderr.preview(), "ZeroDivisionError\n");
    }

    #[tokio::test]
    async fn out_of_order_running_after_completed_is_dropped_and_record_stays_completed() {
        let (reconciler, durable) = reconciler();
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        eval.status = Status::Completed;
        eval.completed_at = Some(Utc::now());
        durable.upsert_evaluation(&eval).await.unwrap();

        let stale = event(eval.id.clone(), 5, EventPayload::Running { slot: SlotId(1), sandbox_id: SandboxId("s".into()) });
        let outcome = reconciler.apply(&stale).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::DroppedInvalidTransition { .. }));

        let record = durable.get_evaluation(&eval.id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Completed);
    }
}
