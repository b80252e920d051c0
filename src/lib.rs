//! Background core of the InsightBoard browser extension, run as a native messaging host.
//! Tracks how long the focused tab's domain stays in front, keeps per-day totals on disk and
//! reconciles them with a per-user remote document.
//!

pub mod browser;
pub mod channel;
pub mod daemon;
pub mod error;
pub mod rollover;
pub mod storage;
pub mod sync;
pub mod tracker;
pub mod utils;
