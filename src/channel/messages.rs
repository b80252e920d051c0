use serde::{Deserialize, Serialize};

use crate::{
    browser::{IdleState, TabId},
    storage::entities::UsageSnapshot,
};

/// Everything the extension sends to the host: popup commands and forwarded browser events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Without a value the current state is flipped.
    TogglePause {
        #[serde(default)]
        value: Option<bool>,
    },
    ForceSync,
    UserLoggedIn {
        user_id: String,
        #[serde(default)]
        id_token: Option<String>,
    },
    UserLoggedOut,
    GetSnapshot,
    TabActivated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        active: bool,
    },
    TabRemoved {
        tab_id: TabId,
    },
    IdleStateChanged {
        state: IdleState,
    },
}

impl Command {
    /// Popup commands are answered, forwarded browser events are not.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Command::TogglePause { .. }
                | Command::ForceSync
                | Command::UserLoggedIn { .. }
                | Command::UserLoggedOut
                | Command::GetSnapshot
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    /// Echoed back in the response so the extension can match it to its callback.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<UsageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayChange {
    pub old_key: String,
    pub new_key: String,
}

/// Broadcasts to every listening UI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    DayChanged { payload: DayChange },
    SyncComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "response")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub reply: Reply,
}

/// A frame written to the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Response(Response),
    Notification(Notification),
}

impl OutboundMessage {
    pub fn response(id: Option<u64>, reply: Reply) -> Self {
        OutboundMessage::Response(Response { id, reply })
    }
}
