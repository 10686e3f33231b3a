//! P1 timestamps, `YYMMDDhhmmssX` where `X` is `S` (summer) or `W` (winter).

use chrono::{Local, NaiveDateTime};
use tracing::error;

const TIMESTAMP_FMT: &str = "%y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 13;

/// Parses a meter timestamp.
///
/// The DST flag is only checked, not applied. Malformed input is logged and
/// falls back to the local wall-clock time so a bad timestamp never stops a
/// telegram from being processed.
pub fn parse_timestamp(ts: &str) -> NaiveDateTime {
    if ts.chars().count() != TIMESTAMP_LEN {
        error!(ts, "Expecting {TIMESTAMP_LEN} characters in timestamp");
    }
    if !matches!(ts.chars().nth(TIMESTAMP_LEN - 1), Some('S') | Some('W')) {
        error!(ts, "Expecting S or W at the end of timestamp");
    }
    let digits: String = ts.chars().take(TIMESTAMP_LEN - 1).collect();
    match NaiveDateTime::parse_from_str(&digits, TIMESTAMP_FMT) {
        Ok(dt) => dt,
        Err(e) => {
            error!(ts, error = %e, "Cannot parse timestamp, using current time");
            Local::now().naive_local()
        }
    }
}

/// Human readable form used in the display table
pub fn format_timestamp(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
