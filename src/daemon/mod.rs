use std::{path::Path, sync::Arc};

use anyhow::Result;
use collection::reader::MessageReader;
use config::HostConfig;
use output::MessageWriter;
use processing::{dispatcher::CommandDispatcher, ProcessingModule};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    browser::BrowserTabs,
    channel::{
        messages::{InboundMessage, OutboundMessage},
        EventChannel,
    },
    rollover::RolloverScheduler,
    storage::{kv::JsonFileStore, usage::UsageStore},
    sync::{
        auth::SessionAuth, firestore::FirestoreStore, memory::MemoryRemoteStore, RemoteStore,
        SyncGateway,
    },
    tracker::{SessionTracker, SharedTracker},
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod collection;
pub mod config;
pub mod output;
pub mod processing;
pub mod shutdown;
pub mod timers;

const MESSAGE_BUFFER: usize = 32;

/// Represents the starting point for the host: talks to the browser over stdin / stdout until
/// the browser closes the pipe.
pub async fn start_daemon(dir: &Path, config: HostConfig) -> Result<()> {
    let auth = Arc::new(SessionAuth::new());
    let remote: Arc<dyn RemoteStore> = match config.firestore.clone() {
        Some(firestore) => {
            info!("Syncing to Firestore project {}", firestore.project_id);
            Arc::new(FirestoreStore::new(firestore, auth.clone())?)
        }
        None => {
            warn!("No remote store configured, usage is only kept locally");
            Arc::new(MemoryRemoteStore::new())
        }
    };

    let host = Host::new(dir, config, remote, auth, Arc::new(DefaultClock))?;
    host.run(tokio::io::stdin(), tokio::io::stdout()).await
}

/// All long-lived components of a running host.
pub struct Host {
    config: HostConfig,
    clock: Arc<dyn Clock>,
    usage: Arc<UsageStore>,
    tabs: Arc<BrowserTabs>,
    auth: Arc<SessionAuth>,
    tracker: SharedTracker,
    gateway: Arc<SyncGateway>,
    scheduler: Arc<RolloverScheduler>,
    channel: EventChannel,
    shutdown: CancellationToken,
}

impl Host {
    pub fn new(
        dir: &Path,
        config: HostConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<SessionAuth>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = Arc::new(JsonFileStore::new(dir.to_path_buf())?);
        info!("Local storage at {:?}", store.path());
        let usage = Arc::new(UsageStore::new(store, config.backlog_days));
        let tabs = Arc::new(BrowserTabs::new());
        let channel = EventChannel::new();
        let shutdown = CancellationToken::new();

        let tracker = Arc::new(Mutex::new(SessionTracker::new(
            usage.clone(),
            tabs.clone(),
            clock.clone(),
            config.min_flush,
        )));
        let gateway = Arc::new(SyncGateway::new(
            remote,
            auth.clone(),
            usage.clone(),
            clock.clone(),
            channel.clone(),
        ));
        let scheduler = Arc::new(RolloverScheduler::new(
            tracker.clone(),
            usage.clone(),
            gateway.clone(),
            clock.clone(),
            channel.clone(),
            config.rollover_grace,
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            clock,
            usage,
            tabs,
            auth,
            tracker,
            gateway,
            scheduler,
            channel,
            shutdown,
        })
    }

    pub async fn run<R, W>(self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match self.tracker.lock().await.start().await {
            Ok(report) => info!(
                "Started, {} stale days kept for sync, {} keys removed",
                report.archived.len(),
                report.removed.len()
            ),
            Err(e) => warn!("Failed to restore state on start: {e}"),
        }

        let (sender, receiver) = mpsc::channel::<InboundMessage>(MESSAGE_BUFFER);
        let (reply_sender, reply_receiver) = mpsc::channel::<OutboundMessage>(MESSAGE_BUFFER);

        let reader = MessageReader::new(input, sender, self.shutdown.clone());
        let writer = MessageWriter::new(
            output,
            reply_receiver,
            self.channel.subscribe(),
            self.shutdown.clone(),
        );
        let processor = ProcessingModule::new(
            receiver,
            CommandDispatcher::new(
                self.tracker.clone(),
                self.tabs.clone(),
                self.auth.clone(),
                self.usage.clone(),
                self.gateway.clone(),
                self.scheduler.clone(),
                self.clock.clone(),
                reply_sender,
            ),
        );

        let (
            _,
            reader_result,
            processing_result,
            writer_result,
            flush_result,
            sync_result,
            rollover_result,
        ) = tokio::join!(
            shutdown::detect_shutdown(self.shutdown.clone()),
            reader.run(),
            processor.run(),
            writer.run(),
            timers::flush_periodically(
                self.tracker.clone(),
                self.clock.clone(),
                self.config.flush_interval,
                self.shutdown.clone(),
            ),
            timers::sync_periodically(
                self.gateway.clone(),
                self.clock.clone(),
                self.config.sync_interval,
                self.shutdown.clone(),
            ),
            self.scheduler.run(),
        );

        for (module, result) in [
            ("Reader", reader_result),
            ("Processing", processing_result),
            ("Writer", writer_result),
            ("Flush timer", flush_result),
            ("Sync timer", sync_result),
            ("Rollover", rollover_result),
        ] {
            if let Err(e) = result {
                error!("{module} module got an error {e:?}");
            }
        }

        info!("Host stopped");
        Ok(())
    }
}
