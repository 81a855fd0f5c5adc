//! Session clock
//!
//! Maps a raw timestamp to the start of its enclosing bar under exchange
//! session rules. Every bar is labelled by its LEFT edge.
//!
//! Trading runs 09:30-11:30 and 13:00-15:00 local time. Feed quirks are
//! folded into the session instead of being dropped:
//!
//! ```text
//! before 09:25           discarded
//! 09:25 .. 09:30         labelled 09:30 (opening auction)
//! exactly 11:30          labelled 11:30 - bar (last morning bar)
//! exactly 15:00          labelled 15:00 - bar (last afternoon bar)
//! after 15:00            discarded (post-market)
//! ```
//!
//! The pre-open check runs on the bar-truncated time, so a 15m bar drops
//! 09:27 (it truncates to 09:15) while a 5m bar folds it into 09:30. The
//! post-market check uses minute resolution so `15:00:xx` closing-auction
//! ticks stay in the last bar while `15:01` onwards is dropped for every size.
//! The daily size never discards: it doubles as an intraday snapshot label.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::time::SECONDS_PER_DAY;

/// 09:25 local.
pub const PRE_OPEN: i64 = 9 * 3600 + 25 * 60;
/// 09:30 local.
pub const MORNING_OPEN: i64 = 9 * 3600 + 30 * 60;
/// 11:30 local.
pub const MORNING_CLOSE: i64 = 11 * 3600 + 30 * 60;
/// 12:00 local; splits morning from afternoon for the hourly grids.
pub const MIDDAY: i64 = 12 * 3600;
/// 13:00 local.
pub const AFTERNOON_OPEN: i64 = 13 * 3600;
/// 15:00 local.
pub const AFTERNOON_CLOSE: i64 = 15 * 3600;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown bar size {0:?}, expected one of 1m, 5m, 15m, 30m, 60m, 120m, 1d")]
pub struct ParseBarSizeError(pub String);

/// Supported bar sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BarSize {
    M1,
    M5,
    M15,
    M30,
    M60,
    M120,
    D1,
}

impl BarSize {
    pub const ALL: [BarSize; 7] = [
        BarSize::M1,
        BarSize::M5,
        BarSize::M15,
        BarSize::M30,
        BarSize::M60,
        BarSize::M120,
        BarSize::D1,
    ];

    /// Duration in seconds.
    pub fn seconds(self) -> i64 {
        match self {
            BarSize::M1 => 60,
            BarSize::M5 => 300,
            BarSize::M15 => 900,
            BarSize::M30 => 1800,
            BarSize::M60 => 3600,
            BarSize::M120 => 7200,
            BarSize::D1 => SECONDS_PER_DAY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BarSize::M1 => "1m",
            BarSize::M5 => "5m",
            BarSize::M15 => "15m",
            BarSize::M30 => "30m",
            BarSize::M60 => "60m",
            BarSize::M120 => "120m",
            BarSize::D1 => "1d",
        }
    }

    /// Start of the bar containing `ts_secs`, in epoch seconds.
    ///
    /// `None` means the timestamp is outside the session and must be skipped.
    pub fn bucket_start(self, ts_secs: i64, tz_offset: i64) -> Option<i64> {
        match self {
            BarSize::M1 | BarSize::M5 | BarSize::M15 | BarSize::M30 => {
                session_bucket(ts_secs, tz_offset, self.seconds())
            }
            BarSize::M60 => {
                let minute = session_bucket(ts_secs, tz_offset, 60)?;
                let (day, s) = split_local(minute, tz_offset);
                // Hourly grid is anchored at 09:30/10:30 in the morning and
                // on the hour in the afternoon.
                let s = if s < MIDDAY {
                    (s - 1800).div_euclid(3600) * 3600 + 1800
                } else {
                    s.div_euclid(3600) * 3600
                };
                Some(day + s - tz_offset)
            }
            BarSize::M120 => {
                let minute = session_bucket(ts_secs, tz_offset, 60)?;
                let (day, s) = split_local(minute, tz_offset);
                let s = if s < MIDDAY {
                    MORNING_OPEN
                } else {
                    AFTERNOON_OPEN
                };
                Some(day + s - tz_offset)
            }
            BarSize::D1 => {
                let local = ts_secs + tz_offset;
                Some(local.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY - tz_offset)
            }
        }
    }
}

impl fmt::Display for BarSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BarSize {
    type Err = ParseBarSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BarSize::ALL
            .into_iter()
            .find(|size| size.label() == s)
            .ok_or_else(|| ParseBarSizeError(s.to_string()))
    }
}

impl TryFrom<String> for BarSize {
    type Error = ParseBarSizeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BarSize> for String {
    fn from(size: BarSize) -> Self {
        size.label().to_string()
    }
}

/// Local day start (seconds, local epoch) and seconds since local midnight.
fn split_local(ts_secs: i64, tz_offset: i64) -> (i64, i64) {
    let local = ts_secs + tz_offset;
    let day = local.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY;
    (day, local - day)
}

/// Session-aware bucket start for an arbitrary intraday bar width.
///
/// Returns the bar start in epoch seconds, or `None` for pre-open and
/// post-market timestamps.
pub fn session_bucket(ts_secs: i64, tz_offset: i64, bar_secs: i64) -> Option<i64> {
    let (day, raw) = split_local(ts_secs, tz_offset);
    let s = raw - raw.rem_euclid(bar_secs);
    let minute = raw - raw.rem_euclid(60);
    if s < PRE_OPEN || minute > AFTERNOON_CLOSE {
        return None;
    }

    let s = if s < MORNING_OPEN {
        MORNING_OPEN
    } else if s == MORNING_CLOSE {
        MORNING_CLOSE - bar_secs
    } else if s == AFTERNOON_CLOSE {
        AFTERNOON_CLOSE - bar_secs
    } else {
        s
    };
    Some(day + s - tz_offset)
}

/// A bucket-labelling function over epoch seconds.
pub trait Label {
    fn bucket_start(&self, ts_secs: i64, tz_offset: i64) -> Option<i64>;

    /// Label a millisecond record time; the result is in milliseconds.
    fn bucket_start_ms(&self, ts_ms: u64, tz_offset: i64) -> Option<u64> {
        let secs = (ts_ms / 1000) as i64;
        self.bucket_start(secs, tz_offset)
            .and_then(|start| u64::try_from(start).ok())
            .map(|start| start * 1000)
    }
}

impl Label for BarSize {
    fn bucket_start(&self, ts_secs: i64, tz_offset: i64) -> Option<i64> {
        BarSize::bucket_start(*self, ts_secs, tz_offset)
    }
}

impl<F> Label for F
where
    F: Fn(i64, i64) -> Option<i64>,
{
    fn bucket_start(&self, ts_secs: i64, tz_offset: i64) -> Option<i64> {
        self(ts_secs, tz_offset)
    }
}
