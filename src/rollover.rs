//! Midnight rollover. One loop owns the only pending midnight timer; it hands the day that just
//! ended to the sync gateway and opens the new day's key.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{select, sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    channel::{
        messages::{DayChange, Notification},
        EventChannel,
    },
    storage::usage::UsageStore,
    sync::SyncGateway,
    tracker::SharedTracker,
    utils::{
        clock::Clock,
        time::{date_from_key, millis_to_midnight, today_key},
    },
};

pub struct RolloverScheduler {
    tracker: SharedTracker,
    usage: Arc<UsageStore>,
    gateway: Arc<SyncGateway>,
    clock: Arc<dyn Clock>,
    channel: EventChannel,
    /// Time the outgoing push gets before the new day's key is created.
    grace: Duration,
    rearm: Notify,
    shutdown: CancellationToken,
}

impl RolloverScheduler {
    pub fn new(
        tracker: SharedTracker,
        usage: Arc<UsageStore>,
        gateway: Arc<SyncGateway>,
        clock: Arc<dyn Clock>,
        channel: EventChannel,
        grace: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            usage,
            gateway,
            clock,
            channel,
            grace,
            rearm: Notify::new(),
            shutdown,
        }
    }

    /// Drops the pending timer and arms a new one from the current wall clock.
    pub fn reschedule(&self) {
        self.rearm.notify_one();
    }

    pub async fn run(&self) -> Result<()> {
        let mut current_key = today_key(&self.clock.now());
        loop {
            let now = self.clock.now();
            if today_key(&now) != current_key {
                self.roll_over(&current_key).await;
                current_key = today_key(&self.clock.now());
                continue;
            }

            let wait = millis_to_midnight(&now);
            info!("Scheduled midnight reset in {} minutes", wait / 1000 / 60);
            select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.rearm.notified() => debug!("Midnight timer re-armed"),
                _ = self.clock.sleep(Duration::from_millis(wait)) => (),
            }
        }
        info!("Rollover scheduler stopped");
        Ok(())
    }

    /// Closes `outgoing_key`: flushes the running session, starts the push of the finished
    /// day in the background, then after the grace delay creates the new day's key and
    /// announces the change. Returns the push task, if one was started.
    pub async fn roll_over(&self, outgoing_key: &str) -> Option<JoinHandle<()>> {
        info!("Midnight reset triggered for {outgoing_key}");

        if let Err(e) = self.tracker.lock().await.flush().await {
            warn!("Failed to flush before rollover: {e}");
        }

        let push = match (self.usage.get(outgoing_key).await, date_from_key(outgoing_key)) {
            (Ok(sites), Some(date)) if !sites.is_empty() => {
                info!("Saving {outgoing_key} data before reset");
                let gateway = self.gateway.clone();
                let key = outgoing_key.to_owned();
                Some(tokio::spawn(async move {
                    gateway.push_outgoing_day(&key, date, &sites).await
                }))
            }
            (Ok(_), _) => {
                if let Err(e) = self.usage.remove(outgoing_key).await {
                    warn!("Failed to remove empty {outgoing_key}: {e:?}");
                }
                None
            }
            (Err(e), _) => {
                // Left in place; the next startup moves it into the backlog.
                warn!("Failed to read {outgoing_key}: {e:?}");
                None
            }
        };

        self.clock.sleep(self.grace).await;

        let new_key = today_key(&self.clock.now());
        if new_key == outgoing_key {
            warn!("Rollover fired before the date changed, keeping {outgoing_key}");
            return push;
        }
        match self.usage.initialize(&new_key).await {
            Ok(()) => info!("Created new storage for {new_key}"),
            Err(e) => warn!("Failed to create {new_key}: {e:?}"),
        }
        self.channel.notify(Notification::DayChanged {
            payload: DayChange {
                old_key: outgoing_key.to_owned(),
                new_key,
            },
        });
        push
    }
}
