use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crucible_domain::{EvaluationId, SlotId};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::PoolError;
use crate::health::HealthTracker;

struct Slot {
    id: SlotId,
    held_by: Option<EvaluationId>,
    health: HealthTracker,
}

/// Hands out at most N concurrent sandbox slots across the fleet.
///
/// A single `tokio::sync::Mutex` covers reserve/release/snapshot: `N` is an
/// operator config value (expected to be small), so the whole scan-and-hold
/// operation being atomic matters far more than lock granularity.
pub struct ExecutorPool {
    slots: Mutex<Vec<Slot>>,
}

impl ExecutorPool {
    pub fn new(size: u32) -> Self {
        Self::with_health(size, 3, ChronoDuration::seconds(30))
    }

    pub fn with_health(size: u32, quarantine_threshold: u32, cool_down: ChronoDuration) -> Self {
        let slots = (1..=size)
            .map(|id| Slot {
                id: SlotId(id),
                held_by: None,
                health: HealthTracker::new(quarantine_threshold, cool_down),
            })
            .collect();
        Self { slots: Mutex::new(slots) }
    }

    /// Atomically reserves the lowest free, non-quarantined slot id.
    /// Returns `None` rather than blocking — callers back off and retry.
    pub async fn try_reserve(&self, eval_id: &EvaluationId) -> Option<SlotId> {
        let now = Utc::now();
        let mut slots = self.slots.lock().await;
        let slot = slots.iter_mut().find(|s| s.held_by.is_none() && !s.health.is_quarantined(now))?;
        slot.held_by = Some(eval_id.clone());
        info!(slot_id = slot.id.0, evaluation_id = %eval_id, "slot reserved");
        Some(slot.id)
    }

    /// Idempotent: releasing an already-free slot succeeds. Refuses (never
    /// panics) when the slot is held by a different evaluation.
    pub async fn release(&self, slot_id: SlotId, eval_id: &EvaluationId) -> Result<(), PoolError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.iter_mut().find(|s| s.id == slot_id).ok_or(PoolError::UnknownSlot(slot_id.0))?;
        match &slot.held_by {
            None => Ok(()),
            Some(holder) if holder == eval_id => {
                slot.held_by = None;
                info!(slot_id = slot_id.0, evaluation_id = %eval_id, "slot released");
                Ok(())
            }
            Some(_) => Err(PoolError::Conflict(slot_id.0)),
        }
    }

    pub async fn report_failure(&self, slot_id: SlotId) -> Result<(), PoolError> {
        let now = Utc::now();
        let mut slots = self.slots.lock().await;
        let slot = slots.iter_mut().find(|s| s.id == slot_id).ok_or(PoolError::UnknownSlot(slot_id.0))?;
        slot.health.record_failure(now);
        if slot.health.is_quarantined(now) {
            warn!(slot_id = slot_id.0, "slot quarantined after repeated driver failures");
        }
        Ok(())
    }

    pub async fn report_success(&self, slot_id: SlotId) -> Result<(), PoolError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.iter_mut().find(|s| s.id == slot_id).ok_or(PoolError::UnknownSlot(slot_id.0))?;
        slot.health.record_success();
        Ok(())
    }

    pub async fn snapshot(&self) -> HashMap<SlotId, Option<EvaluationId>> {
        let slots = self.slots.lock().await;
        slots.iter().map(|s| (s.id, s.held_by.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(s: &str) -> EvaluationId {
        EvaluationId::from_string(s.to_string())
    }

    #[tokio::test]
    async fn reserve_picks_the_lowest_free_slot_deterministically() {
        let pool = ExecutorPool::new(3);
        let a = pool.try_reserve(&eval("a")).await.unwrap();
        assert_eq!(a.0, 1);
        let b = pool.try_reserve(&eval("b")).await.unwrap();
        assert_eq!(b.0, 2);
        pool.release(a, &eval("a")).await.unwrap();
        let c = pool.try_reserve(&eval("c")).await.unwrap();
        assert_eq!(c.0, 1);
    }

    #[tokio::test]
    async fn pool_exhaustion_returns_none_instead_of_blocking() {
        let pool = ExecutorPool::new(1);
        pool.try_reserve(&eval("a")).await.unwrap();
        assert!(pool.try_reserve(&eval("b")).await.is_none());
    }

    #[tokio::test]
    async fn release_refuses_when_held_by_a_different_evaluation() {
        let pool = ExecutorPool::new(1);
        let slot = pool.try_reserve(&eval("a")).await.unwrap();
        let err = pool.release(slot, &eval("b")).await.unwrap_err();
        assert!(matches!(err, PoolError::Conflict(_)));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = ExecutorPool::new(1);
        let slot = pool.try_reserve(&eval("a")).await.unwrap();
        pool.release(slot, &eval("a")).await.unwrap();
        pool.release(slot, &eval("a")).await.unwrap();
    }

    #[tokio::test]
    async fn quarantined_slot_is_skipped_by_reserve() {
        let pool = ExecutorPool::with_health(1, 1, ChronoDuration::seconds(60));
        let slot = pool.try_reserve(&eval("a")).await.unwrap();
        pool.release(slot, &eval("a")).await.unwrap();
        pool.report_failure(slot).await.unwrap();
        assert!(pool.try_reserve(&eval("b")).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_reflects_current_holders() {
        let pool = ExecutorPool::new(2);
        let a = eval("a");
        let slot = pool.try_reserve(&a).await.unwrap();
        let snap = pool.snapshot().await;
        assert_eq!(snap.get(&slot).unwrap(), &Some(a));
    }
}
