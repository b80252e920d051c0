use chrono::{DateTime, Local};

/// What the tracker is attributing time to right now. Never persisted.
///
/// The enum makes the invalid combinations unrepresentable: a paused session has neither
/// domain nor start, and a domain always comes with its start.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveSession {
    #[default]
    Idle,
    Tracking {
        domain: String,
        started_at: DateTime<Local>,
    },
    Paused,
}

impl ActiveSession {
    pub fn tracking(domain: impl Into<String>, started_at: DateTime<Local>) -> Self {
        Self::Tracking {
            domain: domain.into(),
            started_at,
        }
    }

    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::Tracking { domain, .. } => Some(domain),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        match self {
            Self::Tracking { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}
