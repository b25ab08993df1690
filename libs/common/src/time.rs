//! Modified Julian Date helpers.

use chrono::{DateTime, Utc};

/// MJD of the Unix epoch (1970-01-01T00:00:00Z).
pub const UNIX_EPOCH_MJD: f64 = 40_587.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

pub fn to_mjd(ts: DateTime<Utc>) -> f64 {
    let secs = ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_millis()) / 1000.0;
    UNIX_EPOCH_MJD + secs / SECONDS_PER_DAY
}

pub fn now_mjd() -> f64 {
    to_mjd(Utc::now())
}

/// `[now - days, now]` as MJD bounds.
pub fn lookback_window(now: DateTime<Utc>, days: i64) -> (f64, f64) {
    let end = to_mjd(now);
    (end - days as f64, end)
}
