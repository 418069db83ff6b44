//! Scheduled worker restarts.
//!
//! The worker leaks memory over time, so it is replaced on a fixed interval.
//! The restart runs under the same lock as requests: it waits for an
//! in-flight exchange to finish and holds queued requests until the new
//! worker is ready (or the failure has been recorded as the sticky error).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::Shared;

/// Spawn the restart scheduler.
///
/// Sleeps `period` between restarts until `cancel` fires. A shutdown that
/// lands while the task waits for the lock is noticed once the lock is
/// acquired, and no restart is attempted.
#[must_use]
pub(super) fn spawn_restart_task(
    shared: Arc<Shared>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("restart scheduler shutting down");
                    break;
                }
                () = tokio::time::sleep(period) => {}
            }

            let mut state = shared.state.lock().await;
            if cancel.is_cancelled() || state.closed {
                info!("restart scheduler shutting down");
                break;
            }

            info!(?period, "scheduled worker restart");
            if let Err(err) = shared.restart_locked(&mut state).await {
                error!(%err, "scheduled worker restart failed");
            }
        }
    })
}
