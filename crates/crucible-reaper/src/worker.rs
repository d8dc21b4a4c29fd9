use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::sweep::Reaper;

/// Runs `reaper.sweep()` on a fixed interval (default 60s per spec),
/// forever. The same daemon-loop shape as the dispatcher/watcher workers:
/// one bad sweep is logged and the loop continues rather than dying.
pub async fn run(reaper: Arc<Reaper>, interval: Duration) -> ! {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match reaper.sweep().await {
            Ok(report) => {
                if report.released_running > 0 || report.orphaned > 0 || report.freed_slots > 0 {
                    info!(
                        released_running = report.released_running,
                        orphaned = report.orphaned,
                        freed_slots = report.freed_slots,
                        "reaper sweep restored invariants"
                    );
                }
            }
            Err(e) => error!(error = %e, "reaper sweep failed"),
        }
    }
}
