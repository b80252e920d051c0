//!  Local persistence is organized through [usage::UsageStore] on top of a
//!  [kv::KeyValueStore].
//!  The basic idea is:
//!   - Every local day has exactly one `usage-YYYY-MM-DD` key holding domain -> milliseconds.
//!   - Only the current day lives under `usage-`. Past days that were never confirmed by the
//!     remote are parked under `unsynced-YYYY-MM-DD` for a bounded number of days.
//!   - UI preferences (`paused`, `darkMode`) share the same store.

pub mod entities;
pub mod kv;
pub mod usage;
