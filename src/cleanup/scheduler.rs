use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{CleanUpRequest, CleanUpService};

/// key: kms-cleanup-scheduler -> periodic sweep until shutdown
/// The first sweep runs one full interval after start.
pub fn spawn(
    service: Arc<CleanUpService>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("kms clean up scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = process_tick(&service, &cancel).await {
                        warn!(?err, "kms clean up tick failed");
                    }
                }
            }
        }
    })
}

/// key: kms-cleanup-scheduler -> tick handler
pub async fn process_tick(
    service: &CleanUpService,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let report = service.clean_up(CleanUpRequest::default(), cancel).await?;
    info!(
        keys_deleted = report.keys.deleted,
        keys_failed = report.keys.failed,
        roles_deleted = report.roles.deleted,
        cancelled = report.cancelled,
        "scheduled kms clean up completed"
    );
    Ok(())
}
