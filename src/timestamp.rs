use chrono::{Local, Utc};

/// Microseconds since the Unix epoch, read from the local wall clock. This
/// is the clock orders are stamped with, so staleness checks and the kill
/// rate-limit all use it.
pub fn timestamp_now() -> i64 {
    Utc::now().timestamp_micros()
}

/// Wall-clock prefix for diagnostic lines.
pub fn log_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Whole seconds elapsed since an event stamped `utime` microseconds.
pub fn age_seconds(now_us: i64, utime: i64) -> i64 {
    (now_us - utime) / 1_000_000
}
