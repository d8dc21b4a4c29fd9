use std::sync::Arc;

use chrono::Utc;
use crucible_bus::EventBus;
use crucible_domain::{EventPayload, SlotId, Status};
use crucible_driver::{DriverRegistry, SandboxLimits};
use crucible_pool::ExecutorPool;
use crucible_queue::TaskQueue;
use crucible_statemachine::TransitionTable;
use crucible_store::{DurableStore, EphemeralStore, RunningRecord};
use serde_json::Value as Handle;
use tracing::{info, warn};

use crate::error::DispatchError;

/// Everything one `dispatch_once` call needs, bundled so the worker loop
/// doesn't have to thread six `Arc`s through every call site.
pub struct Dispatcher {
    pub queue: Arc<dyn TaskQueue>,
    pub pool: Arc<ExecutorPool>,
    pub durable: Arc<dyn DurableStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub bus: Arc<dyn EventBus>,
    pub table: Arc<TransitionTable>,
    pub drivers: Arc<DriverRegistry>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Nothing was queued.
    Idle,
    /// A task was pulled but every slot is currently held; it was nacked
    /// for immediate redelivery and the caller should back off.
    NoSlotAvailable,
    /// Pulled task referred to an evaluation already past `queued`
    /// (redelivery of an already-handled task); acked as a no-op.
    AlreadyHandled,
    /// `driver.create`/`driver.start` failed; the evaluation was moved to
    /// `failed` and its slot released.
    CreateFailed,
    /// A sandbox is now running for this evaluation; the caller hands
    /// `evaluation_id`/`handle` off to the watcher.
    Dispatched { evaluation_id: crucible_domain::EvaluationId, slot: SlotId, handle: Handle },
}

/// One iteration of the dispatcher loop. Never panics; any
/// recoverable failure becomes a `DispatchOutcome` variant or bubbles as a
/// `DispatchError` for the caller to log and continue past.
pub async fn dispatch_once(d: &Dispatcher, visibility_timeout: std::time::Duration) -> Result<DispatchOutcome, DispatchError> {
    let Some(task) = d.queue.pull(visibility_timeout).await? else {
        return Ok(DispatchOutcome::Idle);
    };
    let id = task.evaluation_id.clone();
    let span = tracing::info_span!("dispatch", evaluation_id = %id);
    let _enter = span.enter();

    let evaluation = d
        .durable
        .get_evaluation(&id)
        .await?
        .ok_or_else(|| DispatchError::EvaluationMissing(id.to_string()))?;

    if evaluation.status != Status::Queued {
        // Redelivery of a task whose transition already happened: the
        // `queued -> provisioning` guard below would have rejected this
        // the first time, so a status other than `queued` here means
        // someone else already progressed it.
        d.queue.ack(&id).await?;
        return Ok(DispatchOutcome::AlreadyHandled);
    }

    let (ok, reason) = d.table.validate_transition(Status::Queued, Status::Provisioning);
    if !ok {
        warn!(reason = reason.as_deref().unwrap_or(""), "queued -> provisioning rejected");
        d.queue.ack(&id).await?;
        return Ok(DispatchOutcome::AlreadyHandled);
    }
    d.bus.publish(&id, EventPayload::Provisioning).await?;

    let Some(slot) = d.pool.try_reserve(&id).await else {
        d.queue.nack(&id).await?;
        return Ok(DispatchOutcome::NoSlotAvailable);
    };

    let limits = SandboxLimits { timeout: std::time::Duration::from_secs(evaluation.timeout_secs as u64), ..SandboxLimits::default() };
    let driver = match d.drivers.resolve(&evaluation.language) {
        Ok(driver) => driver,
        Err(e) => {
            warn!(error = %e, "no driver configured for language");
            d.pool.release(slot, &id).await?;
            d.bus
                .publish(&id, EventPayload::Failed { exit_code: -1, cause: crucible_domain::Cause::Infrastructure })
                .await?;
            d.queue.ack(&id).await?;
            return Ok(DispatchOutcome::CreateFailed);
        }
    };

    let handle = match driver.create(&evaluation.code, &evaluation.language, &limits).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "sandbox creation failed");
            d.pool.release(slot, &id).await?;
            d.bus
                .publish(&id, EventPayload::Failed { exit_code: -1, cause: crucible_domain::Cause::Infrastructure })
                .await?;
            d.queue.ack(&id).await?;
            return Ok(DispatchOutcome::CreateFailed);
        }
    };

    let sandbox_id = handle
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| crucible_domain::SandboxId(s.to_string()))
        .unwrap_or_else(|| crucible_domain::SandboxId(handle.to_string()));

    d.ephemeral
        .put_running(&id, RunningRecord { slot, sandbox_id: sandbox_id.clone(), started_at: Utc::now() })
        .await?;
    d.bus.publish(&id, EventPayload::Running { slot, sandbox_id }).await?;

    if let Err(e) = driver.start(&handle).await {
        warn!(error = %e, "sandbox start failed");
        let _ = driver.destroy(&handle).await;
        d.ephemeral.delete_running(&id).await?;
        d.pool.release(slot, &id).await?;
        d.bus
            .publish(&id, EventPayload::Failed { exit_code: -1, cause: crucible_domain::Cause::Infrastructure })
            .await?;
        d.queue.ack(&id).await?;
        return Ok(DispatchOutcome::CreateFailed);
    }

    d.queue.ack(&id).await?;
    info!(slot = slot.0, "sandbox started, handing off to watcher");
    Ok(DispatchOutcome::Dispatched { evaluation_id: id, slot, handle })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crucible_bus::InMemoryBus;
    use crucible_domain::{Evaluation, Priority};
    use crucible_driver::{DriverRegistry, ProcessDriver};
    use crucible_queue::{InMemoryQueue, Task, TaskQueue};
    use crucible_store::{InMemoryDurableStore, InMemoryEphemeralStore};

    use super::*;

    fn make_dispatcher() -> Dispatcher {
        make_dispatcher_with_pool(2)
    }

    fn make_dispatcher_with_pool(pool_size: u32) -> Dispatcher {
        let mut backends: HashMap<String, Arc<dyn crucible_driver::Driver>> = HashMap::new();
        backends.insert("process".to_string(), Arc::new(ProcessDriver::new()));
        let mut language_backend = HashMap::new();
        language_backend.insert("python".to_string(), "process".to_string());

        Dispatcher {
            queue: Arc::new(InMemoryQueue::new()),
            pool: Arc::new(ExecutorPool::new(pool_size)),
            durable: Arc::new(InMemoryDurableStore::default()),
            ephemeral: Arc::new(InMemoryEphemeralStore::default()),
            bus: Arc::new(InMemoryBus::new()),
            table: Arc::new(TransitionTable::default_table()),
            drivers: Arc::new(DriverRegistry::new(backends, language_backend)),
        }
    }

    #[tokio::test]
    async fn idle_when_queue_is_empty() {
        let d = make_dispatcher();
        let outcome = dispatch_once(&d, std::time::Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Idle));
    }

    #[tokio::test]
    async fn happy_path_dispatches_a_queued_python_evaluation() {
        let d = make_dispatcher();
        let mut evaluation = Evaluation::new("print('hi')", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        evaluation.status = Status::Queued;
        d.durable.upsert_evaluation(&evaluation).await.unwrap();
        d.queue.push(Task::new(evaluation.id.clone(), Priority::Normal)).await.unwrap();

        let outcome = dispatch_once(&d, std::time::Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn redelivery_of_an_already_progressed_task_is_a_no_op() {
        let d = make_dispatcher();
        let mut evaluation =
            Evaluation::new("print('hi')", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        evaluation.status = Status::Running; // already past queued
        d.durable.upsert_evaluation(&evaluation).await.unwrap();
        d.queue.push(Task::new(evaluation.id.clone(), Priority::Normal)).await.unwrap();

        let outcome = dispatch_once(&d, std::time::Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::AlreadyHandled));
    }

    #[tokio::test]
    async fn pool_exhaustion_nacks_for_redelivery() {
        let d = make_dispatcher();
        // Drain both slots first.
        let holder = crucible_domain::EvaluationId::new();
        d.pool.try_reserve(&holder).await.unwrap();
        let holder2 = crucible_domain::EvaluationId::new();
        d.pool.try_reserve(&holder2).await.unwrap();

        let mut evaluation =
            Evaluation::new("print('hi')", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        evaluation.status = Status::Queued;
        d.durable.upsert_evaluation(&evaluation).await.unwrap();
        d.queue.push(Task::new(evaluation.id.clone(), Priority::Normal)).await.unwrap();

        let outcome = dispatch_once(&d, std::time::Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::NoSlotAvailable));
    }

    #[tokio::test]
    async fn single_slot_dispatches_high_before_normal_then_resumes_fifo_on_release() {
        let d = make_dispatcher_with_pool(1);

        let mut a = Evaluation::new("a", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        a.status = Status::Queued;
        let mut b = Evaluation::new("b", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now());
        b.status = Status::Queued;
        let mut c = Evaluation::new("c", "python", Priority::High, 10, serde_json::json!({}), Utc::now());
        c.status = Status::Queued;
        for e in [&a, &b, &c] {
            d.durable.upsert_evaluation(e).await.unwrap();
        }
        d.queue.push(Task::new(a.id.clone(), Priority::Normal)).await.unwrap();
        d.queue.push(Task::new(b.id.clone(), Priority::Normal)).await.unwrap();
        d.queue.push(Task::new(c.id.clone(), Priority::High)).await.unwrap();

        // High-priority `c` dispatches first despite being enqueued last.
        let outcome = dispatch_once(&d, std::time::Duration::from_secs(30)).await.unwrap();
        let slot = match outcome {
            DispatchOutcome::Dispatched { evaluation_id, slot, .. } => {
                assert_eq!(evaluation_id, c.id);
                slot
            }
            other => panic!("expected c to dispatch, got {other:?}"),
        };

        // The sole slot is now held; the next pull (FIFO `a`) finds no slot
        // and is nacked back onto the queue rather than lost.
        let outcome = dispatch_once(&d, std::time::Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::NoSlotAvailable));
        assert_eq!(d.queue.depth().await.unwrap().normal, 2);

        // Once the slot is released, FIFO ordering resumes: `a` goes next.
        d.pool.release(slot, &c.id).await.unwrap();
        let outcome = dispatch_once(&d, std::time::Duration::from_secs(30)).await.unwrap();
        match outcome {
            DispatchOutcome::Dispatched { evaluation_id, .. } => assert_eq!(evaluation_id, a.id),
            other => panic!("expected a to dispatch, got {other:?}"),
        }
    }
}
