use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::SessionController;

/// Background sweep that expires sessions whose deadline has passed.
/// Runs until `cancel` fires.
pub fn spawn_sweeper(
    controller: Arc<SessionController>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = controller.expire_due().await;
                    if expired > 0 {
                        tracing::debug!(expired, remaining = controller.session_count(), "expiry sweep");
                    }
                }
            }
        }

        tracing::debug!("expiry sweeper stopped");
    })
}
