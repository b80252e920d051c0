//! Reconciliation of local usage with the shared remote document store.
//! [SyncGateway] is the only component that talks to a [RemoteStore]; the remote copy of a
//! day is always merged into, never replaced.

pub mod auth;
pub mod document;
pub mod firestore;
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::{
    channel::{messages::Notification, EventChannel},
    error::{TrackerError, TrackerResult},
    storage::{
        entities::{merge_max, DailyUsageRecord, SiteUsage},
        usage::UsageStore,
    },
    utils::{
        clock::Clock,
        time::{doc_id, local_date, today_key},
    },
};

use auth::AuthProvider;
use document::RemoteUsageDocument;

/// Document store the usage is synced to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns `None` when the document doesn't exist.
    async fn get_document(&self, doc_id: &str) -> Result<Option<RemoteUsageDocument>>;

    /// Upserts with merge semantics: fields, and entries of `sites`, that `document` doesn't
    /// mention keep their remote values.
    async fn merge_document(&self, doc_id: &str, document: &RemoteUsageDocument) -> Result<()>;
}

pub struct SyncGateway {
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    usage: Arc<UsageStore>,
    clock: Arc<dyn Clock>,
    channel: EventChannel,
}

impl SyncGateway {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        usage: Arc<UsageStore>,
        clock: Arc<dyn Clock>,
        channel: EventChannel,
    ) -> Self {
        Self {
            remote,
            auth,
            usage,
            clock,
            channel,
        }
    }

    pub fn current_user(&self) -> Option<String> {
        self.auth.current_user_id()
    }

    /// Writes `sites` into the user's document for `date`. Without a user nothing is sent.
    /// Pushing the same map twice leaves the document as pushing it once.
    pub async fn push(
        &self,
        user_id: Option<&str>,
        date: NaiveDate,
        sites: &SiteUsage,
    ) -> TrackerResult<()> {
        let user_id = user_id.ok_or(TrackerError::NotAuthenticated)?;
        let record =
            DailyUsageRecord::new(user_id, date, sites.clone(), self.clock.now().to_utc());
        let doc_id = doc_id(user_id, date);

        self.remote
            .merge_document(&doc_id, &RemoteUsageDocument::from(&record))
            .await
            .map_err(|cause| TrackerError::RemoteWrite {
                doc_id: doc_id.clone(),
                cause,
            })?;

        info!("Synced {doc_id}, {}ms total", record.total_time_ms());
        self.channel.notify(Notification::SyncComplete);
        Ok(())
    }

    /// Remote sites for `date`, empty when nothing was synced yet.
    pub async fn pull(&self, user_id: Option<&str>, date: NaiveDate) -> TrackerResult<SiteUsage> {
        let user_id = user_id.ok_or(TrackerError::NotAuthenticated)?;
        let doc_id = doc_id(user_id, date);
        let document = self
            .remote
            .get_document(&doc_id)
            .await
            .map_err(|cause| TrackerError::RemoteRead {
                doc_id: doc_id.clone(),
                cause,
            })?;
        debug!("Pulled {doc_id}, found: {}", document.is_some());
        Ok(document.map(|d| d.sites).unwrap_or_default())
    }

    /// Pushes a day that no longer lives locally under `usage-`. The remote copy is read
    /// first and the push carries the per-domain maximum so nothing another device wrote is
    /// lowered.
    async fn push_merged(
        &self,
        user_id: &str,
        date: NaiveDate,
        sites: &SiteUsage,
    ) -> TrackerResult<()> {
        let remote = self.pull(Some(user_id), date).await?;
        self.push(Some(user_id), date, &merge_max(sites, &remote))
            .await
    }

    /// Pushes the local map of `date_key`, raised to the remote values where another device
    /// got further. The local map itself is left as it is.
    pub async fn sync_day(&self, date_key: &str, date: NaiveDate) -> TrackerResult<bool> {
        let sites = self.usage.get(date_key).await?;
        if sites.is_empty() {
            debug!("Nothing to sync for {date_key}");
            return Ok(false);
        }
        let user_id = self.current_user().ok_or(TrackerError::NotAuthenticated)?;
        self.push_merged(&user_id, date, &sites).await?;
        Ok(true)
    }

    /// Pull, merge into the local map with per-domain maximum, push the result back.
    pub async fn reconcile(&self, date_key: &str, date: NaiveDate) -> TrackerResult<SiteUsage> {
        let user_id = self.current_user();
        let remote = self.pull(user_id.as_deref(), date).await?;
        let merged = self.usage.merge_max(date_key, &remote).await?;
        if !merged.is_empty() {
            self.push(user_id.as_deref(), date, &merged).await?;
        }
        Ok(merged)
    }

    /// Drains the backlog, then pushes today's map. Returns whether today had anything to
    /// push.
    pub async fn sync_today(&self) -> TrackerResult<bool> {
        let now = self.clock.now();
        self.push_backlog().await?;
        self.sync_day(&today_key(&now), local_date(&now)).await
    }

    /// Pushes every day parked in the unsynced backlog, dropping each one only after the
    /// remote accepted it. Returns how many days were pushed.
    pub async fn push_backlog(&self) -> TrackerResult<usize> {
        let user_id = self.current_user().ok_or(TrackerError::NotAuthenticated)?;
        let mut pushed = 0;
        for (date, sites) in self.usage.backlog().await? {
            match self.push_merged(&user_id, date, &sites).await {
                Ok(()) => {
                    self.usage.confirm_synced(date).await?;
                    pushed += 1;
                }
                Err(e) => warn!("Backlog day {date} stays local: {e}"),
            }
        }
        Ok(pushed)
    }

    /// Best-effort push of the day that just ended. The local key is removed only once the
    /// remote confirmed; otherwise the day moves to the backlog.
    pub async fn push_outgoing_day(&self, date_key: &str, date: NaiveDate, sites: &SiteUsage) {
        let result = match self.current_user() {
            Some(user_id) => self.push_merged(&user_id, date, sites).await,
            None => Err(TrackerError::NotAuthenticated),
        };

        let cleanup = match result {
            Ok(()) => self.usage.remove(date_key).await,
            Err(e) => {
                warn!("Keeping {date_key} for a later sync: {e}");
                self.usage.archive_unsynced(date_key).await
            }
        };
        if let Err(e) = cleanup {
            warn!("Failed to clean up {date_key} after rollover: {e:?}");
        }
    }
}
