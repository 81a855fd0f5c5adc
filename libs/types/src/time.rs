//! Timestamp helpers
//!
//! Records carry UTC epoch milliseconds; the exchange session rules are
//! expressed in local wall-clock time, so these helpers convert between the
//! two for a fixed timezone offset (seconds east of UTC).

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

use crate::errors::RecordError;

/// Default exchange timezone offset (UTC+8).
pub const DEFAULT_TZ_OFFSET: i64 = 8 * 3600;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Epoch milliseconds for a local wall-clock time on `date`.
pub fn local_ms(
    date: NaiveDate,
    hour: u32,
    minute: u32,
    second: u32,
    tz_offset: i64,
) -> Result<u64, RecordError> {
    let naive = date
        .and_hms_opt(hour, minute, second)
        .ok_or(RecordError::InvalidTime {
            hour,
            minute,
            second,
        })?;
    let local_secs = naive.and_utc().timestamp();
    Ok(((local_secs - tz_offset) * 1000) as u64)
}

/// Local date-time for an epoch-millisecond timestamp.
pub fn to_local(ts_ms: u64, tz_offset: i64) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(i32::try_from(tz_offset).ok()?)?;
    offset.timestamp_millis_opt(ts_ms as i64).single()
}

/// Human-readable local time, e.g. `2025-02-28 09:30:00.000+08:00`.
pub fn format_ms(ts_ms: u64, tz_offset: i64) -> String {
    match to_local(ts_ms, tz_offset) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f%:z").to_string(),
        None => format!("{ts_ms}ms"),
    }
}

/// Seconds since local midnight.
pub fn seconds_of_day(ts_secs: i64, tz_offset: i64) -> i64 {
    (ts_secs + tz_offset).rem_euclid(SECONDS_PER_DAY)
}
