use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info};

use crate::dispatch::{dispatch_once, DispatchOutcome, Dispatcher};

/// Runs `dispatch_once` in a loop forever with a `continue`-on-error shape:
/// one bad iteration is logged and the loop keeps going rather than taking
/// the whole worker down.
///
/// Back-pressure: on `NoSlotAvailable` or `Idle`, sleeps with jittered
/// exponential backoff between `backoff_base` and `backoff_cap`.
pub async fn run(
    dispatcher: Arc<Dispatcher>,
    visibility_timeout: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
) -> ! {
    let mut backoff = backoff_base;
    loop {
        match dispatch_once(&dispatcher, visibility_timeout).await {
            Ok(DispatchOutcome::Dispatched { slot, .. }) => {
                info!(slot = slot.0, "dispatch succeeded");
                backoff = backoff_base;
            }
            Ok(DispatchOutcome::AlreadyHandled | DispatchOutcome::CreateFailed) => {
                backoff = backoff_base;
            }
            Ok(DispatchOutcome::Idle | DispatchOutcome::NoSlotAvailable) => {
                let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
                let sleep_for = backoff.mul_f64(jitter);
                tokio::time::sleep(sleep_for).await;
                backoff = (backoff * 2).min(backoff_cap);
            }
            Err(e) => {
                error!(error = %e, "dispatch iteration failed");
                tokio::time::sleep(backoff_base).await;
            }
        }
    }
}
