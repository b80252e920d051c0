use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};

pub const USAGE_KEY_PREFIX: &str = "usage-";
pub const UNSYNCED_KEY_PREFIX: &str = "unsynced-";

/// This is the standard way of converting a date to a string in insightboard.
pub fn local_date_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Calendar date of `now` in its own timezone. For [chrono::Local] this is the device date,
/// not the UTC one.
pub fn local_date<Tz: TimeZone>(now: &DateTime<Tz>) -> NaiveDate {
    now.date_naive()
}

pub fn usage_key(date: NaiveDate) -> String {
    format!("{USAGE_KEY_PREFIX}{}", local_date_string(date))
}

/// Storage key of the day `now` falls on, e.g. `usage-2025-05-21`.
pub fn today_key<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    usage_key(local_date(now))
}

pub fn unsynced_key(date: NaiveDate) -> String {
    format!("{UNSYNCED_KEY_PREFIX}{}", local_date_string(date))
}

/// Remote document id for a user and day, `<userId>_<YYYY-MM-DD>`.
pub fn doc_id(user_id: &str, date: NaiveDate) -> String {
    format!("{user_id}_{}", local_date_string(date))
}

/// Parses the date out of a `usage-` or `unsynced-` key.
pub fn date_from_key(key: &str) -> Option<NaiveDate> {
    let date = key
        .strip_prefix(USAGE_KEY_PREFIX)
        .or_else(|| key.strip_prefix(UNSYNCED_KEY_PREFIX))?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Returns the first instant of the next local day. When midnight itself is skipped by a
/// daylight saving jump the first existing local time after it is used.
pub fn next_day_start<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let timezone = now.timezone();
    let midnight = now.date_naive().and_time(NaiveTime::MIN) + Duration::days(1);
    let mut candidate = midnight;
    // No timezone skips more than a day.
    for _ in 0..48 {
        if let Some(start) = timezone.from_local_datetime(&candidate).earliest() {
            return start;
        }
        candidate += Duration::minutes(30);
    }
    now.clone() + Duration::days(1)
}

/// Milliseconds until the next local midnight. Never negative.
pub fn millis_to_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> u64 {
    let next = next_day_start(now);
    next.signed_duration_since(now.clone())
        .num_milliseconds()
        .max(0) as u64
}
