use std::time::Duration;

use tracing::warn;

use crate::sync::firestore::FirestoreConfig;

use super::args::HostArgs;

const FLUSH_INTERVAL: Duration = Duration::from_secs(30);
const MIN_FLUSH: Duration = Duration::from_secs(1);
const ROLLOVER_GRACE: Duration = Duration::from_secs(2);
const SYNC_INTERVAL: Duration = Duration::from_secs(60);
const BACKLOG_DAYS: u32 = 7;

/// Tunables of a running host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub flush_interval: Duration,
    pub min_flush: Duration,
    pub rollover_grace: Duration,
    pub sync_interval: Duration,
    pub backlog_days: u32,
    /// Without it usage is only synced to an in-process store.
    pub firestore: Option<FirestoreConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            flush_interval: FLUSH_INTERVAL,
            min_flush: MIN_FLUSH,
            rollover_grace: ROLLOVER_GRACE,
            sync_interval: SYNC_INTERVAL,
            backlog_days: BACKLOG_DAYS,
            firestore: None,
        }
    }
}

impl HostConfig {
    pub fn from_args(args: &HostArgs) -> Self {
        let firestore = match (&args.firestore_project, &args.firestore_api_key) {
            (Some(project), Some(key)) => Some(FirestoreConfig::new(project.clone(), key.clone())),
            (None, None) => None,
            _ => {
                warn!("Firestore needs both a project and an API key, remote sync disabled");
                None
            }
        };
        Self {
            firestore,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_firestore_needs_project_and_key() {
        let args = HostArgs::parse_from([
            "insightboard-host",
            "--firestore-project",
            "p",
            "--firestore-api-key",
            "k",
        ]);
        let config = HostConfig::from_args(&args);
        assert_eq!(config.firestore, Some(FirestoreConfig::new("p".into(), "k".into())));
        assert_eq!(config.flush_interval, Duration::from_secs(30));

        let partial = HostArgs::parse_from(["insightboard-host", "--firestore-project", "p"]);
        assert_eq!(HostConfig::from_args(&partial).firestore, None);
    }
}
