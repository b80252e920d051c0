use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{sync::SyncGateway, tracker::SharedTracker, utils::clock::Clock};

use super::processing::dispatcher::log_sync_failure;

/// Saves the running session every `interval`, so a crash loses at most one interval.
pub async fn flush_periodically(
    tracker: SharedTracker,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        select! {
            _ = shutdown.cancelled() => break,
            _ = clock.sleep(interval) => {
                match tracker.lock().await.flush().await {
                    Ok(ms) => debug!("Periodic flush saved {ms}ms"),
                    Err(e) => warn!("Periodic flush failed: {e}"),
                }
            }
        }
    }
    Ok(())
}

/// Pushes today's usage and the backlog every `interval` while someone is signed in.
pub async fn sync_periodically(
    gateway: Arc<SyncGateway>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        select! {
            _ = shutdown.cancelled() => break,
            _ = clock.sleep(interval) => {
                if gateway.current_user().is_none() {
                    continue;
                }
                if let Err(e) = gateway.sync_today().await {
                    log_sync_failure("Periodic sync", e);
                }
            }
        }
    }
    Ok(())
}
