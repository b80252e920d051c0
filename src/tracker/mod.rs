//! The active-session tracker. Every browser event that changes what the user is looking at
//! ends up here as a transition, and every transition first flushes the time spent on the
//! outgoing domain into [UsageStore].

pub mod session;

use std::sync::Arc;

use chrono::{DateTime, Duration, Local};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    browser::{IdleState, TabId, TabProvider},
    error::{TrackerError, TrackerResult},
    storage::usage::{PruneReport, UsageStore},
    utils::{
        clock::Clock,
        domain::{domain_from_url, is_internal_url},
        time::{next_day_start, today_key},
    },
};

pub use session::ActiveSession;

/// The tracker as owned by the daemon: message dispatch, the flush timer and the rollover
/// scheduler all take turns on it.
pub type SharedTracker = Arc<Mutex<SessionTracker>>;

pub struct SessionTracker {
    session: ActiveSession,
    usage: Arc<UsageStore>,
    tabs: Arc<dyn TabProvider>,
    clock: Arc<dyn Clock>,
    /// Shorter stretches are noise from rapid tab switching and are dropped.
    min_flush: Duration,
}

impl SessionTracker {
    pub fn new(
        usage: Arc<UsageStore>,
        tabs: Arc<dyn TabProvider>,
        clock: Arc<dyn Clock>,
        min_flush: std::time::Duration,
    ) -> Self {
        Self {
            session: ActiveSession::Idle,
            usage,
            tabs,
            clock,
            min_flush: Duration::from_std(min_flush).unwrap_or(Duration::seconds(1)),
        }
    }

    pub fn session(&self) -> &ActiveSession {
        &self.session
    }

    pub fn is_paused(&self) -> bool {
        self.session.is_paused()
    }

    /// Brings the tracker up after a process start: restores the pause flag, makes sure
    /// today's key exists, parks stale days and starts tracking the active tab if known.
    pub async fn start(&mut self) -> TrackerResult<PruneReport> {
        let now = self.clock.now();
        let key = today_key(&now);
        self.usage.initialize(&key).await?;
        let report = self.usage.prune_stale_keys(&key).await?;

        if self.usage.paused().await? {
            info!("Restored paused state");
            self.session = ActiveSession::Paused;
        } else {
            self.session = self.session_for_active_tab(now).await;
        }
        Ok(report)
    }

    /// Flushes elapsed time of the current session. Returns how many milliseconds were
    /// recorded.
    pub async fn flush(&mut self) -> TrackerResult<u64> {
        let now = self.clock.now();
        self.flush_at(now).await
    }

    /// Adds time since `started_at` to the tracked domain and moves `started_at` to `now`.
    /// Time is split at local midnights so every part lands on the day it was spent. On a
    /// storage error `started_at` stays at the last written point and the next flush retries.
    async fn flush_at(&mut self, now: DateTime<Local>) -> TrackerResult<u64> {
        let ActiveSession::Tracking { domain, started_at } = &mut self.session else {
            return Ok(0);
        };

        let elapsed = now.signed_duration_since(*started_at);
        if elapsed < self.min_flush {
            debug!("Dropping {}ms on {domain}", elapsed.num_milliseconds());
            *started_at = now;
            return Ok(0);
        }

        let mut recorded = 0;
        while *started_at < now {
            let boundary = next_day_start(started_at).min(now);
            let ms = boundary.signed_duration_since(*started_at).num_milliseconds() as u64;
            let key = today_key(started_at);
            self.usage.accumulate(&key, domain, ms).await?;
            recorded += ms;
            *started_at = boundary;
        }

        debug!("Saved {}s for {domain}", recorded / 1000);
        Ok(recorded)
    }

    /// Flushes the outgoing session and then starts `next` at the same instant, so no time
    /// is lost or attributed twice between the two.
    async fn transition(&mut self, now: DateTime<Local>, next: ActiveSession) -> TrackerResult<()> {
        self.flush_at(now).await?;
        if self.session != next {
            debug!("Session {:?} -> {:?}", self.session, next);
        }
        self.session = next;
        Ok(())
    }

    fn resolve_domain(url: &str) -> TrackerResult<String> {
        if is_internal_url(url) {
            return Err(TrackerError::TabResolution(format!("{url} is a browser page")));
        }
        Ok(domain_from_url(url))
    }

    fn session_for_url(url: TrackerResult<String>, now: DateTime<Local>) -> ActiveSession {
        match url.and_then(|url| Self::resolve_domain(&url)) {
            Ok(domain) => {
                info!("Now tracking: {domain}");
                ActiveSession::tracking(domain, now)
            }
            Err(e) => {
                warn!("Not tracking: {e}");
                ActiveSession::Idle
            }
        }
    }

    async fn session_for_active_tab(&self, now: DateTime<Local>) -> ActiveSession {
        Self::session_for_url(self.tabs.active_tab_url().await, now)
    }

    /// The user switched to another tab.
    pub async fn on_tab_activated(&mut self, tab_id: TabId) -> TrackerResult<()> {
        if self.is_paused() {
            return Ok(());
        }
        let now = self.clock.now();
        self.flush_at(now).await?;
        let next = Self::session_for_url(self.tabs.tab_url(tab_id).await, now);
        self.transition(now, next).await
    }

    /// The active tab navigated to `url` in place.
    pub async fn on_url_changed(&mut self, url: &str) -> TrackerResult<()> {
        if self.is_paused() {
            return Ok(());
        }
        let now = self.clock.now();
        let next = Self::session_for_url(Ok(url.to_owned()), now);
        self.transition(now, next).await
    }

    pub async fn on_idle_state(&mut self, state: IdleState) -> TrackerResult<()> {
        if self.is_paused() {
            return Ok(());
        }
        let now = self.clock.now();
        match state {
            IdleState::Idle | IdleState::Locked => {
                info!("Browser is {state:?}, stopping tracking");
                self.transition(now, ActiveSession::Idle).await
            }
            IdleState::Active => {
                self.flush_at(now).await?;
                let next = self.session_for_active_tab(now).await;
                self.transition(now, next).await
            }
        }
    }

    pub async fn pause(&mut self) -> TrackerResult<()> {
        if !self.is_paused() {
            let now = self.clock.now();
            self.transition(now, ActiveSession::Paused).await?;
            info!("Tracking paused");
        }
        self.usage.set_paused(true).await?;
        Ok(())
    }

    pub async fn resume(&mut self) -> TrackerResult<()> {
        self.usage.set_paused(false).await?;
        if self.is_paused() {
            let now = self.clock.now();
            self.session = self.session_for_active_tab(now).await;
            info!("Tracking resumed");
        }
        Ok(())
    }

    /// Moves to the requested pause state and returns the resulting one.
    pub async fn set_paused(&mut self, paused: bool) -> TrackerResult<bool> {
        if paused {
            self.pause().await?;
        } else {
            self.resume().await?;
        }
        Ok(self.is_paused())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::{anyhow, Result};
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    use super::{ActiveSession, SessionTracker};
    use crate::{
        browser::{BrowserTabs, IdleState, MockTabProvider},
        error::TrackerError,
        storage::{
            entities::SiteUsage,
            kv::{JsonFileStore, KeyValueStore, MockKeyValueStore},
            usage::UsageStore,
        },
        utils::{
            clock::{test_clock::TestClock, Clock},
            logging::TEST_LOGGING,
        },
    };

    const TODAY: &str = "usage-2024-07-04";

    struct Fixture {
        _dir: TempDir,
        kv: Arc<JsonFileStore>,
        usage: Arc<UsageStore>,
        tabs: Arc<BrowserTabs>,
        clock: TestClock,
        tracker: SessionTracker,
    }

    fn fixture() -> Result<Fixture> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let kv = Arc::new(JsonFileStore::new(dir.path().to_owned())?);
        let usage = Arc::new(UsageStore::new(kv.clone(), 7));
        let tabs = Arc::new(BrowserTabs::new());
        let clock = TestClock::noon();
        let tracker = SessionTracker::new(
            usage.clone(),
            tabs.clone(),
            Arc::new(clock.clone()),
            Duration::from_secs(1),
        );
        Ok(Fixture {
            _dir: dir,
            kv,
            usage,
            tabs,
            clock,
            tracker,
        })
    }

    fn usage(values: &[(&str, u64)]) -> SiteUsage {
        values.iter().map(|(d, ms)| (d.to_string(), *ms)).collect()
    }

    impl Fixture {
        async fn activate(&mut self, tab_id: i64, url: &str) -> Result<()> {
            self.tabs.record_activated(tab_id, Some(url.to_owned()));
            self.tracker.on_tab_activated(tab_id).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_switch_pause_resume_scenario() -> Result<()> {
        let mut f = fixture()?;

        f.activate(1, "https://a.com/").await?;
        f.clock.advance_ms(5000);
        f.activate(2, "https://b.com/").await?;
        assert_eq!(f.usage.get(TODAY).await?, usage(&[("a.com", 5000)]));

        f.clock.advance_ms(7000);
        f.tracker.set_paused(true).await?;
        assert_eq!(
            f.usage.get(TODAY).await?,
            usage(&[("a.com", 5000), ("b.com", 7000)])
        );

        f.clock.advance_ms(8000);
        assert!(!f.tracker.set_paused(false).await?);
        assert_eq!(f.tracker.session().domain(), Some("b.com"));

        f.clock.advance_ms(1000);
        f.activate(1, "https://a.com/").await?;
        assert_eq!(
            f.usage.get(TODAY).await?,
            usage(&[("a.com", 5000), ("b.com", 8000)])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_switches_never_double_count() -> Result<()> {
        let mut f = fixture()?;
        let steps: [(i64, &str, i64); 6] = [
            (1, "https://a.com/x", 1200),
            (2, "https://b.com/", 45_000),
            (3, "https://c.com/", 1000),
            (1, "https://a.com/y", 3100),
            (2, "https://b.com/", 61_000),
            (4, "https://d.com/", 2500),
        ];

        let mut elapsed = 0;
        for (tab, url, dwell) in steps {
            f.activate(tab, url).await?;
            f.clock.advance_ms(dwell);
            elapsed += dwell as u64;
            if dwell % 2 == 0 {
                f.tracker.flush().await?;
            }
        }
        f.tracker.flush().await?;

        let stored = f.usage.get(TODAY).await?;
        assert_eq!(stored.values().sum::<u64>(), elapsed);
        assert_eq!(stored["a.com"], 4300);
        assert_eq!(stored["b.com"], 106_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_short_stretches_are_dropped_not_carried() -> Result<()> {
        let mut f = fixture()?;
        f.activate(1, "https://a.com/").await?;
        f.clock.advance_ms(400);
        f.activate(2, "https://b.com/").await?;
        f.clock.advance_ms(999);
        assert_eq!(f.tracker.flush().await?, 0);
        f.clock.advance_ms(1500);
        assert_eq!(f.tracker.flush().await?, 1500);

        assert_eq!(f.usage.get(TODAY).await?, usage(&[("b.com", 1500)]));
        Ok(())
    }

    #[tokio::test]
    async fn test_periodic_flush_keeps_session() -> Result<()> {
        let mut f = fixture()?;
        f.activate(1, "https://a.com/").await?;
        for _ in 0..3 {
            f.clock.advance_ms(30_000);
            assert_eq!(f.tracker.flush().await?, 30_000);
        }
        assert_eq!(f.tracker.session().domain(), Some("a.com"));
        assert_eq!(f.tracker.session().started_at(), Some(f.clock.now()));
        assert_eq!(f.usage.get(TODAY).await?["a.com"], 90_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_pause_ignores_tab_changes() -> Result<()> {
        let mut f = fixture()?;
        f.activate(1, "https://a.com/").await?;
        f.clock.advance_ms(2000);
        f.tracker.pause().await?;

        f.clock.advance_ms(10_000);
        f.activate(2, "https://b.com/").await?;
        f.tracker.on_url_changed("https://c.com/").await?;
        f.tracker.on_idle_state(IdleState::Active).await?;
        f.clock.advance_ms(10_000);
        f.tracker.flush().await?;

        assert_eq!(f.tracker.session(), &ActiveSession::Paused);
        assert_eq!(f.usage.get(TODAY).await?, usage(&[("a.com", 2000)]));
        assert_eq!(f.kv.get("paused").await?, Some(json!(true)));

        f.tracker.resume().await?;
        assert_eq!(f.tracker.session().domain(), Some("b.com"));
        assert_eq!(f.kv.get("paused").await?, Some(json!(false)));
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_stops_and_active_restarts() -> Result<()> {
        let mut f = fixture()?;
        f.activate(1, "https://a.com/").await?;
        f.clock.advance_ms(3000);
        f.tracker.on_idle_state(IdleState::Locked).await?;
        assert_eq!(f.tracker.session(), &ActiveSession::Idle);

        f.clock.advance_ms(600_000);
        f.tracker.on_idle_state(IdleState::Active).await?;
        assert_eq!(f.tracker.session().domain(), Some("a.com"));
        f.clock.advance_ms(2000);
        f.tracker.flush().await?;

        assert_eq!(f.usage.get(TODAY).await?, usage(&[("a.com", 5000)]));
        Ok(())
    }

    #[tokio::test]
    async fn test_url_change_and_internal_pages() -> Result<()> {
        let mut f = fixture()?;
        f.activate(1, "https://a.com/").await?;
        f.clock.advance_ms(2000);
        f.tracker.on_url_changed("https://news.site/").await?;
        f.clock.advance_ms(3000);
        f.tracker.on_url_changed("chrome://settings/").await?;
        assert_eq!(f.tracker.session(), &ActiveSession::Idle);
        f.clock.advance_ms(3000);
        f.tracker.on_url_changed("::garbage::").await?;
        assert_eq!(f.tracker.session().domain(), Some("unknown"));

        assert_eq!(
            f.usage.get(TODAY).await?,
            usage(&[("a.com", 2000), ("news.site", 3000)])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_tab_goes_idle() -> Result<()> {
        let f = fixture()?;
        let mut tabs = MockTabProvider::new();
        tabs.expect_tab_url()
            .returning(|_| Err(TrackerError::TabResolution("permission denied".into())));
        let mut tracker = SessionTracker::new(
            f.usage.clone(),
            Arc::new(tabs),
            Arc::new(f.clock.clone()),
            Duration::from_secs(1),
        );

        tracker.on_tab_activated(7).await?;
        assert_eq!(tracker.session(), &ActiveSession::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_time_is_split_at_midnight() -> Result<()> {
        let mut f = fixture()?;
        let day = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        f.clock.set(day.and_hms_opt(23, 59, 30).unwrap());
        f.activate(1, "https://a.com/").await?;
        f.clock.advance_ms(50_000);
        f.tracker.flush().await?;

        assert_eq!(f.usage.get(TODAY).await?, usage(&[("a.com", 30_000)]));
        assert_eq!(
            f.usage.get("usage-2024-07-05").await?,
            usage(&[("a.com", 20_000)])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_start_restores_pause_and_prunes() -> Result<()> {
        let mut f = fixture()?;
        f.kv.set("paused", json!(true)).await?;
        f.kv.set("usage-2024-07-03", json!({"old.com": 9000})).await?;
        f.tabs.record_activated(1, Some("https://a.com/".into()));

        let report = f.tracker.start().await?;

        assert_eq!(report.archived, vec!["usage-2024-07-03"]);
        assert!(f.tracker.is_paused());
        assert_eq!(f.kv.get(TODAY).await?, Some(json!({})));
        Ok(())
    }

    #[tokio::test]
    async fn test_start_tracks_active_tab() -> Result<()> {
        let mut f = fixture()?;
        f.tabs.record_activated(1, Some("https://a.com/".into()));
        f.tracker.start().await?;
        assert_eq!(f.tracker.session().domain(), Some("a.com"));
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_start_for_retry() -> Result<()> {
        *TEST_LOGGING;
        let clock = TestClock::noon();
        let mut kv = MockKeyValueStore::new();
        kv.expect_get().returning(|_| Ok(None));
        let mut failures = 1;
        kv.expect_set().returning(move |_, _| {
            if failures > 0 {
                failures -= 1;
                Err(anyhow!("disk full"))
            } else {
                Ok(())
            }
        });
        let tabs = Arc::new(BrowserTabs::new());
        tabs.record_activated(1, Some("https://a.com/".into()));
        let mut tracker = SessionTracker::new(
            Arc::new(UsageStore::new(Arc::new(kv), 7)),
            tabs,
            Arc::new(clock.clone()),
            Duration::from_secs(1),
        );
        tracker.on_tab_activated(1).await?;
        let started = tracker.session().started_at();
        assert!(started.is_some());

        clock.advance_ms(30_000);
        assert!(matches!(
            tracker.flush().await,
            Err(TrackerError::Storage(_))
        ));
        assert_eq!(tracker.session().started_at(), started);
        clock.advance_ms(30_000);
        assert_eq!(tracker.flush().await?, 60_000);
        Ok(())
    }
}
