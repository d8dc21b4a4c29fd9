use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crucible_bus::EventBus;
use crucible_domain::{Cause, EvaluationId, EventPayload};
use crucible_driver::{Driver, Handle, WaitReason};
use crucible_store::EphemeralStore;
use futures::StreamExt;
use tracing::{info, warn};

use crate::error::WatcherError;

/// Tunables for one watch session, mirroring the operator controls that
/// feed it (`crucible-config`'s `timeout_slack_secs`, `log_buffer_size`).
pub struct WatchConfig {
    pub timeout: Duration,
    pub slack: Duration,
    pub log_buffer_cap: usize,
}

/// Observes one running sandbox to termination and publishes the
/// appropriate terminal event.
///
/// Structurally this is the same shape as a subprocess-spawning backend's
/// own wait loop: a log-draining task runs concurrently with the wait,
/// and every exit path — normal completion, an outer-timeout safety net
/// firing because the driver hung past its own promised deadline, or an
/// error — reaches `driver.destroy` before returning.
pub async fn watch(
    evaluation_id: EvaluationId,
    handle: Handle,
    driver: Arc<dyn Driver>,
    ephemeral: Arc<dyn EphemeralStore>,
    bus: Arc<dyn EventBus>,
    config: WatchConfig,
) -> Result<(), WatcherError> {
    let span = tracing::info_span!("watch", evaluation_id = %evaluation_id);
    let _enter = span.enter();

    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_watch = spawn_cancel_watch(evaluation_id.clone(), driver.clone(), handle.clone(), bus.clone(), cancel_requested.clone());
    let log_drain = spawn_log_drain(evaluation_id.clone(), handle.clone(), driver.clone(), ephemeral.clone(), bus.clone(), config.log_buffer_cap);

    let outer_deadline = config.timeout + config.slack;
    let wait_result = tokio::time::timeout(outer_deadline, driver.wait(&handle, config.timeout)).await;

    cancel_watch.abort();
    let _ = log_drain.await;

    let payload = match wait_result {
        Ok(Ok(outcome)) => match outcome.reason {
            WaitReason::Normal if outcome.exit_code == 0 => EventPayload::Completed { exit_code: 0 },
            WaitReason::Normal => {
                EventPayload::Failed { exit_code: outcome.exit_code, cause: Cause::from_exit_code(outcome.exit_code) }
            }
            WaitReason::Timeout => EventPayload::Timeout,
            WaitReason::Oom => EventPayload::Failed { exit_code: outcome.exit_code, cause: Cause::MemoryLimit },
            WaitReason::Killed => {
                let cause = if cancel_requested.load(Ordering::SeqCst) { Cause::Cancelled } else { Cause::Infrastructure };
                EventPayload::Failed { exit_code: outcome.exit_code, cause }
            }
        },
        Ok(Err(e)) => {
            warn!(error = %e, "driver wait returned an error");
            EventPayload::Failed { exit_code: -1, cause: Cause::Infrastructure }
        }
        Err(_) => {
            warn!("driver exceeded its outer wall-clock deadline, killing");
            let _ = driver.kill(&handle).await;
            EventPayload::Timeout
        }
    };

    if let Err(e) = driver.destroy(&handle).await {
        warn!(error = %e, "destroy failed after watch completed; terminal event is unaffected");
    }

    bus.publish(&evaluation_id, payload).await?;
    info!("watch finished");
    Ok(())
}

fn spawn_cancel_watch(
    evaluation_id: EvaluationId,
    driver: Arc<dyn Driver>,
    handle: Handle,
    bus: Arc<dyn EventBus>,
    cancel_requested: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(mut stream) = bus.subscribe(&evaluation_id).await else { return };
        while let Some(event) = stream.next().await {
            if matches!(event.payload, EventPayload::CancelRequested) {
                cancel_requested.store(true, Ordering::SeqCst);
                let _ = driver.kill(&handle).await;
                break;
            }
        }
    })
}

fn spawn_log_drain(
    evaluation_id: EvaluationId,
    handle: Handle,
    driver: Arc<dyn Driver>,
    ephemeral: Arc<dyn EphemeralStore>,
    bus: Arc<dyn EventBus>,
    cap: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match driver.stream_logs(&handle).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "could not attach to sandbox log stream");
                return;
            }
        };
        while let Some((origin, chunk)) = stream.next().await {
            if let Err(e) = ephemeral.append_logs(&evaluation_id, origin, &chunk, cap).await {
                warn!(error = %e, "failed to append sandbox logs");
            }
            let _ = bus.publish(&evaluation_id, EventPayload::LogChunk { data: chunk.to_vec() }).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_bus::InMemoryBus;
    use crucible_driver::{ProcessDriver, SandboxLimits};
    use crucible_store::InMemoryEphemeralStore;

    #[tokio::test]
    async fn happy_path_publishes_completed() {
        let driver: Arc<dyn Driver> = Arc::new(ProcessDriver::new());
        let ephemeral: Arc<dyn EphemeralStore> = Arc::new(InMemoryEphemeralStore::default());
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        let id = EvaluationId::new();

        let handle = driver.create("print('hi')", "python", &SandboxLimits::default()).await.unwrap();
        driver.start(&handle).await.unwrap();

        let mut sub = bus.subscribe(&id).await.unwrap();
        let config = WatchConfig { timeout: Duration::from_secs(10), slack: Duration::from_secs(5), log_buffer_cap: 4096 };
        watch(id.clone(), handle, driver, ephemeral, bus, config).await.unwrap();

        let event = sub.next().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Completed { exit_code: 0 }));
    }

    #[tokio::test]
    async fn sandbox_exceeding_its_timeout_publishes_timeout() {
        let driver: Arc<dyn Driver> = Arc::new(ProcessDriver::new());
        let ephemeral: Arc<dyn EphemeralStore> = Arc::new(InMemoryEphemeralStore::default());
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        let id = EvaluationId::new();

        let handle = driver
            .create("import time\nwhile True:\n    time.sleep(1)\n", "python", &SandboxLimits::default())
            .await
            .unwrap();
        driver.start(&handle).await.unwrap();

        let mut sub = bus.subscribe(&id).await.unwrap();
        let config = WatchConfig { timeout: Duration::from_millis(200), slack: Duration::from_millis(100), log_buffer_cap: 4096 };
        watch(id.clone(), handle, driver, ephemeral, bus, config).await.unwrap();

        let event = sub.next().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Timeout));
    }
}
