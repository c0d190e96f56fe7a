//! Time windows
//!
//! Rows are bucketed into half-open windows `[start, end)` derived from a
//! timestamp, the GROUP BY interval and its offset, and an optional fixed
//! time zone. Two rows share a window iff their computed windows are equal.

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::types::{MAX_TIME, MIN_TIME, NANOS_PER_SECOND};

/// GROUP BY time interval in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Interval {
    /// Window width; zero means "no interval"
    pub duration: i64,
    /// Shift applied to window starts, in `[0, duration)`
    pub offset: i64,
}

impl Interval {
    /// Interval of `duration` with no offset
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: duration.as_nanos() as i64,
            offset: 0,
        }
    }

    /// Interval from raw nanoseconds
    pub fn from_nanos(duration: i64, offset: i64) -> Self {
        Self { duration, offset }
    }

    /// Set the offset
    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset.as_nanos() as i64;
        self
    }

    /// True when no interval is configured
    pub fn is_zero(&self) -> bool {
        self.duration == 0
    }
}

/// Compute the window that `t` falls into
///
/// With a zero interval the whole `[range_start, range_end)` range is one
/// window. Starts are clamped to `MIN_TIME`, ends to `MAX_TIME`.
pub fn window(
    t: i64,
    interval: Interval,
    location: Option<&FixedOffset>,
    range_start: i64,
    range_end: i64,
) -> (i64, i64) {
    if interval.is_zero() {
        return (range_start, range_end);
    }
    let duration = interval.duration;

    let t = t.saturating_sub(interval.offset);
    let zone = location
        .map(|z| z.local_minus_utc() as i64 * NANOS_PER_SECOND)
        .unwrap_or(0);

    // Negative remainders round up, shift back by one duration
    let mut dt = t.saturating_add(zone) % duration;
    if dt < 0 {
        dt += duration;
    }

    let mut start = if MIN_TIME.saturating_add(dt) >= t {
        MIN_TIME
    } else {
        t - dt
    };
    start = start.saturating_add(interval.offset);

    let rest = duration - dt;
    let mut end = if MAX_TIME.saturating_sub(rest) <= t {
        MAX_TIME
    } else {
        t + rest
    };
    end = end.saturating_add(interval.offset);

    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_truncates() {
        let iv = Interval::from_nanos(4, 0);
        assert_eq!(window(1, iv, None, MIN_TIME, MAX_TIME), (0, 4));
        assert_eq!(window(4, iv, None, MIN_TIME, MAX_TIME), (4, 8));
        assert_eq!(window(7, iv, None, MIN_TIME, MAX_TIME), (4, 8));
    }

    #[test]
    fn test_window_negative_time() {
        let iv = Interval::from_nanos(10, 0);
        assert_eq!(window(-3, iv, None, MIN_TIME, MAX_TIME), (-10, 0));
    }

    #[test]
    fn test_window_with_offset() {
        let iv = Interval::from_nanos(10, 3);
        assert_eq!(window(12, iv, None, MIN_TIME, MAX_TIME), (3, 13));
        assert_eq!(window(13, iv, None, MIN_TIME, MAX_TIME), (13, 23));
    }

    #[test]
    fn test_window_zero_interval_is_query_range() {
        let iv = Interval::default();
        assert_eq!(window(42, iv, None, 10, 100), (10, 100));
    }

    #[test]
    fn test_window_fixed_zone() {
        let hour = 3600 * NANOS_PER_SECOND;
        let iv = Interval::from_nanos(24 * hour, 0);
        let zone = FixedOffset::east_opt(3600).unwrap();
        // 00:30 UTC is 01:30 local, the local day started at 23:00 UTC
        let (start, end) = window(hour / 2, iv, Some(&zone), MIN_TIME, MAX_TIME);
        assert_eq!(start, -hour);
        assert_eq!(end, 23 * hour);
    }

    #[test]
    fn test_window_clamps_to_sentinels() {
        let iv = Interval::from_nanos(1_000, 0);
        let (start, _) = window(MIN_TIME, iv, None, MIN_TIME, MAX_TIME);
        assert_eq!(start, MIN_TIME);
        let (_, end) = window(MAX_TIME - 1, iv, None, MIN_TIME, MAX_TIME);
        assert_eq!(end, MAX_TIME);
    }
}
