//! Time ranges used when matching chunks and lines against delete requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed interval of milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Closed-interval overlap: `[1, 5]` and `[5, 10]` overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        !(self.start > other.end || other.start > self.end)
    }

    /// Returns true when `other` lies entirely within this interval.
    pub fn covers(&self, other: &Interval) -> bool {
        self.start <= other.start && self.end >= other.end
    }
}

/// Time bounds of a stored chunk, as reported by the chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// First sample timestamp (milliseconds since epoch)
    pub from: i64,
    /// Last sample timestamp (milliseconds since epoch)
    pub through: i64,
}

impl Chunk {
    pub fn new(from: i64, through: i64) -> Self {
        Self { from, through }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.from, self.through)
    }
}

/// Request bounds converted once to wall-clock time so per-line checks do
/// not repeat the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn from_millis(start: i64, end: i64) -> Self {
        Self {
            start: millis_to_datetime(start),
            end: millis_to_datetime(end),
        }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Converts epoch milliseconds, clamping to chrono's representable range.
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(if ms < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_intervals_overlap() {
        assert!(Interval::new(1, 5).overlaps(&Interval::new(5, 10)));
        assert!(Interval::new(5, 10).overlaps(&Interval::new(1, 5)));
    }

    #[test]
    fn test_disjoint_intervals_do_not_overlap() {
        assert!(!Interval::new(1, 4).overlaps(&Interval::new(5, 10)));
        assert!(!Interval::new(11, 20).overlaps(&Interval::new(5, 10)));
    }

    #[test]
    fn test_nested_intervals_overlap() {
        assert!(Interval::new(0, 100).overlaps(&Interval::new(40, 60)));
        assert!(Interval::new(40, 60).overlaps(&Interval::new(0, 100)));
    }

    #[test]
    fn test_covers() {
        let outer = Interval::new(100, 200);
        assert!(outer.covers(&Interval::new(150, 180)));
        assert!(outer.covers(&Interval::new(100, 200)));
        assert!(!outer.covers(&Interval::new(50, 120)));
        assert!(!outer.covers(&Interval::new(150, 201)));
    }

    #[test]
    fn test_time_interval_contains_bounds() {
        let interval = TimeInterval::from_millis(100, 200);
        assert!(interval.contains(millis_to_datetime(100)));
        assert!(interval.contains(millis_to_datetime(200)));
        assert!(!interval.contains(millis_to_datetime(99)));
        assert!(!interval.contains(millis_to_datetime(201)));
    }

    #[test]
    fn test_millis_conversion_clamps() {
        assert_eq!(millis_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(millis_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
        assert_eq!(millis_to_datetime(0).timestamp_millis(), 0);
    }
}
