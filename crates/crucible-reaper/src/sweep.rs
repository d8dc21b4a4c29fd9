use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use crucible_domain::{Cause, Status};
use crucible_pool::ExecutorPool;
use crucible_statemachine::TransitionTable;
use crucible_store::{DurableStore, EphemeralStore};
use tracing::{info, warn};

use crate::error::ReapError;

/// Tally of one sweep pass, returned so callers (and tests) can assert on
/// exactly what was restored rather than just "it didn't error".
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Running records whose durable status had already gone terminal;
    /// their slot and ephemeral state were released.
    pub released_running: u32,
    /// Non-terminal durable records older than the grace window with no
    /// running record backing them; transitioned to `failed`/`orphaned`.
    pub orphaned: u32,
    /// Pool slots held by an evaluation with no running record to justify
    /// the hold; freed directly.
    pub freed_slots: u32,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.released_running += other.released_running;
        self.orphaned += other.orphaned;
        self.freed_slots += other.freed_slots;
    }
}

/// Everything one sweep pass needs. Bundled the same way
/// [`crucible_dispatcher::Dispatcher`] and [`crucible_reconciler::Reconciler`]
/// bundle their collaborators.
pub struct Reaper {
    pub durable: Arc<dyn DurableStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub pool: Arc<ExecutorPool>,
    pub table: Arc<TransitionTable>,
    pub grace_window: ChronoDuration,
}

impl Reaper {
    /// Runs the three restorative passes in order and returns their
    /// combined tally. Never panics; any recoverable failure for one id is
    /// logged and the sweep continues past it.
    pub async fn sweep(&self) -> Result<SweepReport, ReapError> {
        let mut report = SweepReport::default();
        report.merge(self.release_completed_running().await?);
        report.merge(self.fail_stale_non_terminal().await?);
        report.merge(self.free_unbacked_slots().await?);
        Ok(report)
    }

    /// For every id the ephemeral store still calls "running": if the
    /// durable record has already reached a terminal status, the watcher
    /// or reconciler died before cleaning up. Release the slot and clear
    /// the ephemeral record now.
    async fn release_completed_running(&self) -> Result<SweepReport, ReapError> {
        let mut report = SweepReport::default();
        for id in self.ephemeral.list_running().await? {
            let Some(record) = self.durable.get_evaluation(&id).await? else {
                continue;
            };
            if !self.table.is_terminal(record.status) {
                continue;
            }
            if let Some(slot) = record.executor_slot {
                self.pool.release(slot, &id).await?;
            }
            self.ephemeral.delete_running(&id).await?;
            self.ephemeral.clear_pending(&id).await?;
            report.released_running += 1;
            info!(evaluation_id = %id, status = %record.status, "reaper released a stale running record");
        }
        Ok(report)
    }

    /// For every non-terminal durable record older than `grace_window`
    /// with no ephemeral running record behind it, the owning worker died
    /// (or never started); force the transition to `failed`/`orphaned`
    /// through the state machine like any other actor.
    async fn fail_stale_non_terminal(&self) -> Result<SweepReport, ReapError> {
        let mut report = SweepReport::default();
        let now = Utc::now();
        for mut record in self.durable.list_non_terminal().await? {
            if now - record.created_at < self.grace_window {
                continue;
            }
            if self.ephemeral.get_running(&record.id).await?.is_some() {
                continue;
            }

            let (ok, reason) = self.table.validate_transition(record.status, Status::Failed);
            if !ok {
                warn!(evaluation_id = %record.id, reason = reason.as_deref().unwrap_or(""), "reaper could not orphan a stale record");
                continue;
            }

            record.status = Status::Failed;
            record.cause = Some(Cause::Orphaned);
            record.completed_at = Some(now);
            self.durable.upsert_evaluation(&record).await?;

            if let Some(slot) = record.executor_slot {
                self.pool.release(slot, &record.id).await?;
            }
            self.ephemeral.delete_running(&record.id).await?;
            self.ephemeral.clear_pending(&record.id).await?;

            report.orphaned += 1;
            warn!(evaluation_id = %record.id, "reaper orphaned a stale non-terminal record");
        }
        Ok(report)
    }

    /// For every slot the pool still shows as held: if its holder has no
    /// running record, nothing is actually using it. The watcher always
    /// destroys its sandbox before exiting, so a held slot with no running
    /// record means whatever allocated it never finished provisioning or
    /// already unwound elsewhere; free it directly.
    async fn free_unbacked_slots(&self) -> Result<SweepReport, ReapError> {
        let mut report = SweepReport::default();
        for (slot, holder) in self.pool.snapshot().await {
            let Some(eval_id) = holder else { continue };
            if self.ephemeral.get_running(&eval_id).await?.is_some() {
                continue;
            }
            self.pool.release(slot, &eval_id).await?;
            report.freed_slots += 1;
            info!(evaluation_id = %eval_id, slot = slot.0, "reaper freed a slot with no backing running record");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_domain::{Evaluation, EvaluationId, Priority, SandboxId, SlotId};
    use crucible_store::{InMemoryDurableStore, InMemoryEphemeralStore, RunningRecord};

    fn reaper(grace_window: ChronoDuration) -> (Reaper, Arc<dyn DurableStore>, Arc<dyn EphemeralStore>, Arc<ExecutorPool>) {
        let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::default());
        let ephemeral: Arc<dyn EphemeralStore> = Arc::new(InMemoryEphemeralStore::default());
        let pool = Arc::new(ExecutorPool::new(2));
        let reaper = Reaper {
            durable: durable.clone(),
            ephemeral: ephemeral.clone(),
            pool: pool.clone(),
            table: Arc::new(TransitionTable::default_table()),
            grace_window,
        };
        (reaper, durable, ephemeral, pool)
    }

    #[tokio::test]
    async fn releases_a_running_record_behind_an_already_terminal_evaluation() {
        let (reaper, durable, ephemeral, pool) = reaper(ChronoDuration::hours(1));
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        let slot = pool.try_reserve(&eval.id).await.unwrap();
        eval.status = Status::Completed;
        eval.executor_slot = Some(slot);
        durable.upsert_evaluation(&eval).await.unwrap();
        ephemeral
            .put_running(&eval.id, RunningRecord { slot, sandbox_id: SandboxId("s".into()), started_at: Utc::now() })
            .await
            .unwrap();

        let report = reaper.sweep().await.unwrap();
        assert_eq!(report.released_running, 1);
        assert!(ephemeral.get_running(&eval.id).await.unwrap().is_none());
        assert_eq!(pool.snapshot().await.get(&slot).unwrap(), &None);
    }

    #[tokio::test]
    async fn orphans_a_stale_non_terminal_record_past_the_grace_window() {
        let (reaper, durable, _ephemeral, _pool) = reaper(ChronoDuration::seconds(0));
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now() - ChronoDuration::minutes(5));
        eval.status = Status::Running;
        eval.created_at = Utc::now() - ChronoDuration::minutes(5);
        durable.upsert_evaluation(&eval).await.unwrap();

        let report = reaper.sweep().await.unwrap();
        assert_eq!(report.orphaned, 1);
        let updated = durable.get_evaluation(&eval.id).await.unwrap().unwrap();
        assert_eq!(updated.status, Status::Failed);
        assert_eq!(updated.cause, Some(Cause::Orphaned));
    }

    #[tokio::test]
    async fn leaves_a_fresh_non_terminal_record_alone() {
        let (reaper, durable, _ephemeral, _pool) = reaper(ChronoDuration::hours(1));
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        eval.status = Status::Running;
        durable.upsert_evaluation(&eval).await.unwrap();

        let report = reaper.sweep().await.unwrap();
        assert_eq!(report.orphaned, 0);
        let unchanged = durable.get_evaluation(&eval.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, Status::Running);
    }

    #[tokio::test]
    async fn frees_a_slot_with_no_backing_running_record() {
        let (reaper, _durable, _ephemeral, pool) = reaper(ChronoDuration::hours(1));
        let leaked = EvaluationId::new();
        let slot = pool.try_reserve(&leaked).await.unwrap();

        let report = reaper.sweep().await.unwrap();
        assert_eq!(report.freed_slots, 1);
        assert_eq!(pool.snapshot().await.get(&slot).unwrap(), &None);
    }

    #[tokio::test]
    async fn a_healthy_running_evaluation_is_untouched() {
        let (reaper, durable, ephemeral, pool) = reaper(ChronoDuration::hours(1));
        let mut eval = Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        let slot = pool.try_reserve(&eval.id).await.unwrap();
        eval.status = Status::Running;
        eval.executor_slot = Some(slot);
        durable.upsert_evaluation(&eval).await.unwrap();
        ephemeral
            .put_running(&eval.id, RunningRecord { slot, sandbox_id: SandboxId("s".into()), started_at: Utc::now() })
            .await
            .unwrap();

        let report = reaper.sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(pool.snapshot().await.get(&slot).unwrap(), &Some(eval.id));
    }
}
