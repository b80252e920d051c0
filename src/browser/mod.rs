//! Contains the host side of the browser capabilities the tracker needs.
//! The extension can't hand us `chrome.tabs`, so [BrowserTabs] mirrors what it needs from the
//! forwarded tab events and answers [TabProvider] queries from that mirror.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

pub type TabId = i64;

/// Mirrors `chrome.idle.IdleState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Intended to serve as the contract for resolving tab URLs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TabProvider: Send + Sync {
    async fn tab_url(&self, tab_id: TabId) -> TrackerResult<String>;

    /// URL of the focused tab in the focused window.
    async fn active_tab_url(&self) -> TrackerResult<String>;
}

#[derive(Default)]
struct TabsState {
    urls: HashMap<TabId, String>,
    active: Option<TabId>,
}

/// [TabProvider] backed by the tab events the extension forwards.
#[derive(Default)]
pub struct BrowserTabs {
    state: Mutex<TabsState>,
}

impl BrowserTabs {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TabsState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn record_activated(&self, tab_id: TabId, url: Option<String>) {
        self.with_state(|state| {
            state.active = Some(tab_id);
            if let Some(url) = url {
                state.urls.insert(tab_id, url);
            }
        })
    }

    pub fn record_updated(&self, tab_id: TabId, url: Option<String>, active: bool) {
        self.with_state(|state| {
            if active {
                state.active = Some(tab_id);
            }
            if let Some(url) = url {
                state.urls.insert(tab_id, url);
            }
        })
    }

    pub fn record_removed(&self, tab_id: TabId) {
        self.with_state(|state| {
            state.urls.remove(&tab_id);
            if state.active == Some(tab_id) {
                state.active = None;
            }
        })
    }

    pub fn active_tab(&self) -> Option<TabId> {
        self.with_state(|state| state.active)
    }
}

#[async_trait]
impl TabProvider for BrowserTabs {
    async fn tab_url(&self, tab_id: TabId) -> TrackerResult<String> {
        self.with_state(|state| state.urls.get(&tab_id).cloned())
            .ok_or_else(|| TrackerError::TabResolution(format!("no url known for tab {tab_id}")))
    }

    async fn active_tab_url(&self) -> TrackerResult<String> {
        let active = self
            .active_tab()
            .ok_or_else(|| TrackerError::TabResolution("no active tab".into()))?;
        self.tab_url(active).await
    }
}
