use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    browser::{BrowserTabs, IdleState},
    channel::messages::{Command, InboundMessage, OutboundMessage, Reply},
    error::{TrackerError, TrackerResult},
    rollover::RolloverScheduler,
    storage::usage::UsageStore,
    sync::{auth::SessionAuth, SyncGateway},
    tracker::SharedTracker,
    utils::{
        clock::Clock,
        time::{local_date, today_key},
    },
};

use super::module::EventProcessor;

/// Logs a failed sync. Sync problems never reach the popup as errors.
pub fn log_sync_failure(context: &str, error: TrackerError) {
    match error {
        TrackerError::NotAuthenticated => debug!("{context} skipped, nobody is signed in"),
        e => warn!("{context} failed: {e}"),
    }
}

/// Remote work started by a message. It runs next to the message loop so tab events keep
/// flowing while the network is slow.
enum SyncJob {
    Manual,
    Login,
}

impl SyncJob {
    async fn run(self, gateway: &SyncGateway, now: DateTime<Local>) {
        match self {
            SyncJob::Manual => match gateway.sync_today().await {
                Ok(pushed) => info!("Manual sync finished, pushed today: {pushed}"),
                Err(e) => log_sync_failure("Manual sync", e),
            },
            SyncJob::Login => {
                if let Err(e) = gateway.reconcile(&today_key(&now), local_date(&now)).await {
                    log_sync_failure("Login sync", e);
                }
                if let Err(e) = gateway.push_backlog().await {
                    log_sync_failure("Backlog sync", e);
                }
            }
        }
    }
}

/// Bridges the browser's messages to the tracker, the tab registry, the session and the sync
/// gateway, and answers the ones that expect an answer.
pub struct CommandDispatcher {
    tracker: SharedTracker,
    tabs: Arc<BrowserTabs>,
    auth: Arc<SessionAuth>,
    usage: Arc<UsageStore>,
    gateway: Arc<SyncGateway>,
    scheduler: Arc<RolloverScheduler>,
    clock: Arc<dyn Clock>,
    replies: mpsc::Sender<OutboundMessage>,
    syncs: JoinSet<()>,
}

impl CommandDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: SharedTracker,
        tabs: Arc<BrowserTabs>,
        auth: Arc<SessionAuth>,
        usage: Arc<UsageStore>,
        gateway: Arc<SyncGateway>,
        scheduler: Arc<RolloverScheduler>,
        clock: Arc<dyn Clock>,
        replies: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            tracker,
            tabs,
            auth,
            usage,
            gateway,
            scheduler,
            clock,
            replies,
            syncs: JoinSet::new(),
        }
    }

    async fn flush(&self) -> TrackerResult<u64> {
        self.tracker.lock().await.flush().await
    }

    /// Starts `job` in the background. The request is answered once it is done.
    fn start_sync(&mut self, id: Option<u64>, job: SyncJob) {
        let gateway = self.gateway.clone();
        let replies = self.replies.clone();
        let now = self.clock.now();
        self.syncs.spawn(async move {
            job.run(&gateway, now).await;
            if replies
                .send(OutboundMessage::response(id, Reply::ok()))
                .await
                .is_err()
            {
                debug!("Sync finished after the writer stopped");
            }
        });
    }

    fn reap_syncs(&mut self) {
        while let Some(result) = self.syncs.try_join_next() {
            if let Err(e) = result {
                warn!("Sync task failed {e}");
            }
        }
    }

    /// Handles one command. `None` means the answer is sent later by a background sync.
    async fn dispatch(
        &mut self,
        id: Option<u64>,
        command: Command,
    ) -> TrackerResult<Option<Reply>> {
        let reply = match command {
            Command::TogglePause { value } => {
                let mut tracker = self.tracker.lock().await;
                let desired = value.unwrap_or(!tracker.is_paused());
                let paused = tracker.set_paused(desired).await?;
                Reply {
                    paused: Some(paused),
                    ..Reply::ok()
                }
            }
            Command::ForceSync => {
                self.flush().await?;
                self.start_sync(id, SyncJob::Manual);
                return Ok(None);
            }
            Command::UserLoggedIn { user_id, id_token } => {
                self.auth.sign_in(user_id, id_token);
                self.flush().await?;
                self.start_sync(id, SyncJob::Login);
                return Ok(None);
            }
            Command::UserLoggedOut => {
                self.flush().await?;
                self.auth.sign_out();
                Reply::ok()
            }
            Command::GetSnapshot => {
                self.flush().await?;
                let snapshot = self.usage.snapshot(&today_key(&self.clock.now())).await?;
                Reply {
                    snapshot: Some(snapshot),
                    ..Reply::ok()
                }
            }
            Command::TabActivated { tab_id, url } => {
                self.tabs.record_activated(tab_id, url);
                self.tracker.lock().await.on_tab_activated(tab_id).await?;
                Reply::ok()
            }
            Command::TabUpdated {
                tab_id,
                url,
                active,
            } => {
                self.tabs.record_updated(tab_id, url.clone(), active);
                if let (true, Some(url)) = (active, url) {
                    self.tracker.lock().await.on_url_changed(&url).await?;
                }
                Reply::ok()
            }
            Command::TabRemoved { tab_id } => {
                self.tabs.record_removed(tab_id);
                Reply::ok()
            }
            Command::IdleStateChanged { state } => {
                self.tracker.lock().await.on_idle_state(state).await?;
                if state == IdleState::Active {
                    // The wall clock may have jumped while the machine was asleep.
                    self.scheduler.reschedule();
                }
                Reply::ok()
            }
        };
        Ok(Some(reply))
    }

    async fn reply(&self, id: Option<u64>, reply: Reply) -> Result<()> {
        self.replies
            .send(OutboundMessage::response(id, reply))
            .await?;
        Ok(())
    }
}

impl EventProcessor for CommandDispatcher {
    async fn process_next(&mut self, message: InboundMessage) -> Result<()> {
        let InboundMessage { id, command } = message;
        let expects_reply = command.expects_reply();
        self.reap_syncs();

        match self.dispatch(id, command).await {
            Ok(Some(reply)) if expects_reply => self.reply(id, reply).await,
            Ok(_) => Ok(()),
            Err(e) => {
                if expects_reply {
                    self.reply(id, Reply::failed(&e)).await?;
                }
                Err(e.into())
            }
        }
    }

    async fn finalize(&mut self) -> Result<()> {
        info!("Input closed, saving state");
        while let Some(result) = self.syncs.join_next().await {
            if let Err(e) = result {
                warn!("Sync task failed {e}");
            }
        }
        self.flush().await?;
        if let Err(e) = self.gateway.sync_today().await {
            log_sync_failure("Final sync", e);
        }
        Ok(())
    }
}
