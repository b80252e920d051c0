use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds spent per domain during one local day.
pub type SiteUsage = BTreeMap<String, u64>;

pub fn total_time(sites: &SiteUsage) -> u64 {
    sites.values().sum()
}

/// Per-domain maximum of two usage maps. Usage only ever grows, so the larger value always
/// contains the smaller one; the result is commutative and idempotent.
pub fn merge_max(local: &SiteUsage, remote: &SiteUsage) -> SiteUsage {
    let mut merged = local.clone();
    for (domain, &remote_ms) in remote {
        let entry = merged.entry(domain.clone()).or_insert(0);
        *entry = (*entry).max(remote_ms);
    }
    merged
}

/// Usage of one user on one local day. The total is derived from `sites`, it can't be set.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct DailyUsageRecord {
    user_id: String,
    date: NaiveDate,
    sites: SiteUsage,
    last_updated: DateTime<Utc>,
}

impl DailyUsageRecord {
    pub fn new(
        user_id: impl Into<String>,
        date: NaiveDate,
        sites: SiteUsage,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            sites,
            last_updated,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sites(&self) -> &SiteUsage {
        &self.sites
    }

    pub fn total_time_ms(&self) -> u64 {
        total_time(&self.sites)
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

/// What the popup reads to render today's numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub date_key: String,
    pub sites: SiteUsage,
    pub total_time_ms: u64,
    pub paused: bool,
    pub dark_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(values: &[(&str, u64)]) -> SiteUsage {
        values.iter().map(|(d, ms)| (d.to_string(), *ms)).collect()
    }

    #[test]
    fn test_merge_takes_maximum_per_domain() {
        let local = usage(&[("x.com", 3000)]);
        let remote = usage(&[("x.com", 5000), ("y.com", 2000)]);
        assert_eq!(
            merge_max(&local, &remote),
            usage(&[("x.com", 5000), ("y.com", 2000)])
        );
    }

    #[test]
    fn test_merge_is_monotonic_commutative_and_idempotent() {
        let local = usage(&[("a.com", 10), ("b.com", 700), ("c.com", 0)]);
        let remote = usage(&[("b.com", 500), ("d.com", 42)]);
        let merged = merge_max(&local, &remote);

        for (domain, ms) in local.iter().chain(remote.iter()) {
            assert!(merged[domain] >= *ms);
        }
        assert_eq!(merged, merge_max(&remote, &local));
        assert_eq!(merge_max(&merged, &remote), merged);
        assert_eq!(merge_max(&merged, &merged), merged);
    }

    #[test]
    fn test_record_total_follows_sites() {
        let record = DailyUsageRecord::new(
            "uid",
            NaiveDate::from_ymd_opt(2025, 5, 21).unwrap(),
            usage(&[("a.com", 1500), ("b.com", 2500)]),
            Utc::now(),
        );
        assert_eq!(record.total_time_ms(), 4000);
        assert_eq!(total_time(&SiteUsage::new()), 0);
    }
}
