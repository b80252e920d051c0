use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::utils::time::{
    date_from_key, unsynced_key, UNSYNCED_KEY_PREFIX, USAGE_KEY_PREFIX,
};

use super::{
    entities::{merge_max, total_time, SiteUsage, UsageSnapshot},
    kv::KeyValueStore,
};

pub const PAUSED_KEY: &str = "paused";
pub const DARK_MODE_KEY: &str = "darkMode";

/// Outcome of [UsageStore::prune_stale_keys].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Past days moved into the unsynced backlog.
    pub archived: Vec<String>,
    /// Keys deleted outright: empty past days and backlog entries past retention.
    pub removed: Vec<String>,
}

/// Day-keyed usage accumulation on top of a [KeyValueStore].
///
/// Every read-modify-write goes through `write_lock`, which makes [UsageStore::accumulate]
/// atomic even when the periodic flush and an event-driven flush race each other.
pub struct UsageStore {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
    backlog_days: i64,
}

impl UsageStore {
    pub fn new(store: Arc<dyn KeyValueStore>, backlog_days: u32) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            backlog_days: backlog_days as i64,
        }
    }

    async fn read_sites(&self, key: &str) -> Result<SiteUsage> {
        match self.store.get(key).await? {
            None | Some(Value::Null) => Ok(SiteUsage::new()),
            Some(value) => match serde_json::from_value::<SiteUsage>(value) {
                Ok(sites) => Ok(sites),
                Err(e) => {
                    warn!("Ignoring malformed usage under {key}: {e}");
                    Ok(SiteUsage::new())
                }
            },
        }
    }

    async fn write_sites(&self, key: &str, sites: &SiteUsage) -> Result<()> {
        self.store.set(key, serde_json::to_value(sites)?).await
    }

    /// Usage stored for a date key. A missing key reads as an empty map.
    pub async fn get(&self, date_key: &str) -> Result<SiteUsage> {
        self.read_sites(date_key).await
    }

    /// Adds `delta_ms` to `domain` under `date_key` and returns the new value.
    pub async fn accumulate(&self, date_key: &str, domain: &str, delta_ms: u64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut sites = self.read_sites(date_key).await?;
        let entry = sites.entry(domain.to_owned()).or_insert(0);
        *entry = entry.saturating_add(delta_ms);
        let updated = *entry;
        self.write_sites(date_key, &sites).await?;
        Ok(updated)
    }

    /// Creates an empty map under `date_key` unless one already exists.
    pub async fn initialize(&self, date_key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.store.get(date_key).await?.is_none() {
            self.write_sites(date_key, &SiteUsage::new()).await?;
            info!("Created storage key {date_key}");
        }
        Ok(())
    }

    /// Replaces whatever is stored under `date_key` with an empty map.
    pub async fn clear(&self, date_key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_sites(date_key, &SiteUsage::new()).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(&[key.to_owned()]).await
    }

    /// Merges `remote` into the local map with per-domain maximum and returns the result.
    pub async fn merge_max(&self, date_key: &str, remote: &SiteUsage) -> Result<SiteUsage> {
        let _guard = self.write_lock.lock().await;
        let local = self.read_sites(date_key).await?;
        let merged = merge_max(&local, remote);
        if merged != local {
            self.write_sites(date_key, &merged).await?;
        }
        Ok(merged)
    }

    /// Moves the map under a `usage-` key into the unsynced backlog, merging with whatever
    /// the backlog already holds for that day.
    pub async fn archive_unsynced(&self, date_key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.archive_locked(date_key).await
    }

    async fn archive_locked(&self, date_key: &str) -> Result<()> {
        let Some(date) = date_from_key(date_key) else {
            warn!("Removing {date_key}, it isn't a valid date key");
            return self.store.remove(&[date_key.to_owned()]).await;
        };
        let sites = self.read_sites(date_key).await?;
        if !sites.is_empty() {
            let backlog_key = unsynced_key(date);
            let previous = self.read_sites(&backlog_key).await?;
            self.write_sites(&backlog_key, &merge_max(&previous, &sites))
                .await?;
            info!("Kept {}ms of unsynced usage from {date_key}", total_time(&sites));
        }
        self.store.remove(&[date_key.to_owned()]).await
    }

    /// Removes every `usage-` key other than `current_key`. Days that still hold data are
    /// moved into the unsynced backlog first so they can be pushed later; backlog entries
    /// older than the retention window are dropped.
    pub async fn prune_stale_keys(&self, current_key: &str) -> Result<PruneReport> {
        let _guard = self.write_lock.lock().await;
        let mut report = PruneReport::default();
        let current_date = date_from_key(current_key);

        for key in self.store.keys().await? {
            if key == current_key {
                continue;
            }
            if key.starts_with(USAGE_KEY_PREFIX) {
                let has_data = !self.read_sites(&key).await?.is_empty();
                self.archive_locked(&key).await?;
                if has_data {
                    report.archived.push(key);
                } else {
                    report.removed.push(key);
                }
            }
        }

        let Some(current_date) = current_date else {
            return Ok(report);
        };
        let oldest_kept = current_date - Duration::days(self.backlog_days);
        for key in self.store.keys().await? {
            if !key.starts_with(UNSYNCED_KEY_PREFIX) {
                continue;
            }
            match date_from_key(&key) {
                Some(date) if date >= oldest_kept => {}
                _ => {
                    warn!("Dropping unsynced usage {key}, it's past retention");
                    self.store.remove(&[key.clone()]).await?;
                    report.removed.push(key);
                }
            }
        }

        debug!("Pruned stale keys {report:?}");
        Ok(report)
    }

    /// Past days whose push hasn't been confirmed yet, oldest first.
    pub async fn backlog(&self) -> Result<Vec<(NaiveDate, SiteUsage)>> {
        let mut days = vec![];
        for key in self.store.keys().await? {
            if !key.starts_with(UNSYNCED_KEY_PREFIX) {
                continue;
            }
            if let Some(date) = date_from_key(&key) {
                days.push((date, self.read_sites(&key).await?));
            }
        }
        days.sort_by_key(|(date, _)| *date);
        Ok(days)
    }

    /// Drops a backlog day after the remote confirmed it.
    pub async fn confirm_synced(&self, date: NaiveDate) -> Result<()> {
        self.remove(&unsynced_key(date)).await
    }

    pub async fn paused(&self) -> Result<bool> {
        Ok(matches!(
            self.store.get(PAUSED_KEY).await?,
            Some(Value::Bool(true))
        ))
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        self.store.set(PAUSED_KEY, Value::Bool(paused)).await
    }

    pub async fn snapshot(&self, date_key: &str) -> Result<UsageSnapshot> {
        let sites = self.read_sites(date_key).await?;
        let dark_mode = matches!(
            self.store.get(DARK_MODE_KEY).await?,
            Some(Value::Bool(true))
        );
        Ok(UsageSnapshot {
            date_key: date_key.to_owned(),
            total_time_ms: total_time(&sites),
            sites,
            paused: self.paused().await?,
            dark_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    use super::UsageStore;
    use crate::storage::{
        entities::SiteUsage,
        kv::{JsonFileStore, KeyValueStore},
    };

    fn open(dir: &TempDir) -> Result<(Arc<JsonFileStore>, UsageStore)> {
        let kv = Arc::new(JsonFileStore::new(dir.path().to_owned())?);
        Ok((kv.clone(), UsageStore::new(kv, 7)))
    }

    fn usage(values: &[(&str, u64)]) -> SiteUsage {
        values.iter().map(|(d, ms)| (d.to_string(), *ms)).collect()
    }

    #[tokio::test]
    async fn test_accumulate_adds_up() -> Result<()> {
        let dir = tempdir()?;
        let (_, store) = open(&dir)?;

        assert_eq!(store.get("usage-2025-05-21").await?, SiteUsage::new());
        store.accumulate("usage-2025-05-21", "a.com", 1500).await?;
        store.accumulate("usage-2025-05-21", "b.com", 1000).await?;
        let total = store.accumulate("usage-2025-05-21", "a.com", 2500).await?;

        assert_eq!(total, 4000);
        assert_eq!(
            store.get("usage-2025-05-21").await?,
            usage(&[("a.com", 4000), ("b.com", 1000)])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_accumulate_loses_nothing() -> Result<()> {
        let dir = tempdir()?;
        let (_, store) = open(&dir)?;
        let store = Arc::new(store);

        let mut handles = vec![];
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.accumulate("usage-2025-05-21", "a.com", 1000).await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        assert_eq!(store.get("usage-2025-05-21").await?["a.com"], 20_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_keeps_existing_and_clear_resets() -> Result<()> {
        let dir = tempdir()?;
        let (kv, store) = open(&dir)?;

        store.accumulate("usage-2025-05-21", "a.com", 1000).await?;
        store.initialize("usage-2025-05-21").await?;
        assert_eq!(store.get("usage-2025-05-21").await?.len(), 1);

        store.initialize("usage-2025-05-22").await?;
        assert_eq!(kv.get("usage-2025-05-22").await?, Some(json!({})));

        store.clear("usage-2025-05-21").await?;
        assert_eq!(kv.get("usage-2025-05-21").await?, Some(json!({})));
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_archives_stale_days() -> Result<()> {
        let dir = tempdir()?;
        let (kv, store) = open(&dir)?;

        store.accumulate("usage-2025-05-19", "a.com", 60_000).await?;
        store.initialize("usage-2025-05-20").await?;
        store.accumulate("usage-2025-05-21", "b.com", 1000).await?;
        kv.set("usage-2025-05-01", json!({})).await?;
        kv.set("unsynced-2025-05-01", json!({"old.com": 5})).await?;
        kv.set("darkMode", json!(true)).await?;

        let report = store.prune_stale_keys("usage-2025-05-21").await?;

        assert_eq!(report.archived, vec!["usage-2025-05-19"]);
        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(
            removed,
            vec!["unsynced-2025-05-01", "usage-2025-05-01", "usage-2025-05-20"]
        );

        let mut keys = kv.keys().await?;
        keys.sort();
        assert_eq!(
            keys,
            vec!["darkMode", "unsynced-2025-05-19", "usage-2025-05-21"]
        );
        assert_eq!(
            store.backlog().await?,
            vec![(
                NaiveDate::from_ymd_opt(2025, 5, 19).unwrap(),
                usage(&[("a.com", 60_000)])
            )]
        );

        store
            .confirm_synced(NaiveDate::from_ymd_opt(2025, 5, 19).unwrap())
            .await?;
        assert!(store.backlog().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_max_into_local() -> Result<()> {
        let dir = tempdir()?;
        let (_, store) = open(&dir)?;
        store.accumulate("usage-2025-05-21", "x.com", 3000).await?;

        let merged = store
            .merge_max(
                "usage-2025-05-21",
                &usage(&[("x.com", 5000), ("y.com", 2000)]),
            )
            .await?;

        assert_eq!(merged, usage(&[("x.com", 5000), ("y.com", 2000)]));
        assert_eq!(store.get("usage-2025-05-21").await?, merged);
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_and_pause_flag() -> Result<()> {
        let dir = tempdir()?;
        let (kv, store) = open(&dir)?;
        assert!(!store.paused().await?);

        store.set_paused(true).await?;
        kv.set("darkMode", json!(true)).await?;
        store.accumulate("usage-2025-05-21", "a.com", 1200).await?;
        store.accumulate("usage-2025-05-21", "b.com", 800).await?;

        let snapshot = store.snapshot("usage-2025-05-21").await?;
        assert!(snapshot.paused);
        assert!(snapshot.dark_mode);
        assert_eq!(snapshot.total_time_ms, 2000);
        assert_eq!(snapshot.sites.len(), 2);
        Ok(())
    }
}
