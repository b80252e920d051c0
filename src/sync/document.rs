use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::{
    storage::entities::{DailyUsageRecord, SiteUsage},
    utils::time::local_date_string,
};

/// Shape of a document in the remote `usage` collection, id `<userId>_<YYYY-MM-DD>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUsageDocument {
    pub date: String,
    pub user_id: String,
    #[serde(default)]
    pub sites: SiteUsage,
    #[serde(default)]
    pub total_time: u64,
    #[serde(default)]
    pub last_updated: String,
}

impl From<&DailyUsageRecord> for RemoteUsageDocument {
    fn from(record: &DailyUsageRecord) -> Self {
        Self {
            date: local_date_string(record.date()),
            user_id: record.user_id().to_owned(),
            sites: record.sites().clone(),
            total_time: record.total_time_ms(),
            last_updated: record
                .last_updated()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_document_wire_shape() {
        let record = DailyUsageRecord::new(
            "uid",
            NaiveDate::from_ymd_opt(2025, 5, 21).unwrap(),
            [("a.com".to_owned(), 1000), ("b.com".to_owned(), 500)].into(),
            Utc.with_ymd_and_hms(2025, 5, 21, 10, 30, 0).unwrap(),
        );
        let document = RemoteUsageDocument::from(&record);

        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({
                "date": "2025-05-21",
                "userId": "uid",
                "sites": {"a.com": 1000, "b.com": 500},
                "totalTime": 1500,
                "lastUpdated": "2025-05-21T10:30:00.000Z",
            })
        );
    }
}
