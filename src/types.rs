//! Core data types shared by the execution core
//!
//! # Key Types
//!
//! - **`SeriesId`**: Internal identifier of a series, resolved by the index
//! - **`TimeRange`**: Half-open time window `[start, end)` in nanoseconds
//! - **`MIN_TIME` / `MAX_TIME`**: Sentinels used when a query is unbounded
//! - **`series_key`**: Canonical byte key of a series (measurement + sorted tags)
//!
//! # Example
//!
//! ```rust
//! use kuba_exec::types::{TimeRange, MAX_TIME, MIN_TIME};
//!
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(1000));
//! assert!(!range.contains(2000));
//!
//! let unbounded = TimeRange::unbounded();
//! assert_eq!(unbounded.start, MIN_TIME);
//! assert_eq!(unbounded.end, MAX_TIME);
//! ```

use serde::{Deserialize, Serialize};

/// Internal identifier of a series (assigned by the index collaborator)
pub type SeriesId = u64;

/// Smallest timestamp a query may reference (nanoseconds since epoch)
///
/// Leaves headroom below `i64::MIN` so window arithmetic never overflows.
pub const MIN_TIME: i64 = i64::MIN + 2;

/// Largest timestamp a query may reference (nanoseconds since epoch)
pub const MAX_TIME: i64 = i64::MAX - 1;

/// Nanoseconds per second, the default unit of rate-style functions
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Half-open time range `[start, end)` in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,

    /// End timestamp (exclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range with validation
    ///
    /// Returns an error when `start > end`.
    pub fn new(start: i64, end: i64) -> Result<Self, crate::error::Error> {
        if start > end {
            return Err(crate::error::Error::Configuration(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a new time range without validation
    pub fn new_unchecked(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Range covering every representable timestamp
    pub fn unbounded() -> Self {
        Self {
            start: MIN_TIME,
            end: MAX_TIME,
        }
    }

    /// Check if a timestamp falls within `[start, end)`
    #[inline]
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check whether two ranges share at least one timestamp
    pub fn overlaps(&self, min_time: i64, max_time: i64) -> bool {
        min_time < self.end && max_time >= self.start
    }

    /// Intersect with another range, never widening either side
    pub fn intersect(&self, other: &TimeRange) -> TimeRange {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end).max(start);
        TimeRange { start, end }
    }

    /// Duration of the range (saturating)
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// True when the range holds no timestamp
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Build the canonical series key: `measurement,k1=v1,k2=v2` with tags sorted
///
/// The key is the opaque byte string handed to the index collaborator.
pub fn series_key(measurement: &str, tags: &[(String, String)]) -> Vec<u8> {
    let mut sorted: Vec<&(String, String)> = tags.iter().collect();
    sorted.sort();

    let mut key = Vec::with_capacity(measurement.len() + tags.len() * 16);
    key.extend_from_slice(measurement.as_bytes());
    for (k, v) in sorted {
        key.push(b',');
        key.extend_from_slice(k.as_bytes());
        key.push(b'=');
        key.extend_from_slice(v.as_bytes());
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_half_open() {
        let range = TimeRange::new(10, 20).unwrap();
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(!range.contains(9));
        assert_eq!(range.duration(), 10);
    }

    #[test]
    fn test_time_range_invalid() {
        assert!(TimeRange::new(20, 10).is_err());
    }

    #[test]
    fn test_intersect_never_widens() {
        let parent = TimeRange::new(100, 200).unwrap();
        let child = TimeRange::new(50, 150).unwrap();
        let clamped = child.intersect(&parent);
        assert_eq!(clamped, TimeRange::new_unchecked(100, 150));

        let disjoint = TimeRange::new(300, 400).unwrap().intersect(&parent);
        assert!(disjoint.is_empty());
    }

    #[test]
    fn test_overlaps() {
        let range = TimeRange::new(10, 20).unwrap();
        assert!(range.overlaps(0, 10));
        assert!(range.overlaps(19, 30));
        assert!(!range.overlaps(20, 30));
        assert!(!range.overlaps(0, 9));
    }

    #[test]
    fn test_series_key_sorted() {
        let tags = vec![
            ("host".to_string(), "a".to_string()),
            ("dc".to_string(), "east".to_string()),
        ];
        assert_eq!(series_key("cpu", &tags), b"cpu,dc=east,host=a".to_vec());
    }
}
