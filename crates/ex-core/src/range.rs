//! Time range model: raw (possibly relative) ranges and their resolved
//! absolute bounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MINUTE_MS: i64 = 60 * 1000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;

/// Resolved absolute time range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from_ms: i64,
    pub to_ms: i64,
}

impl TimeRange {
    pub fn new(from_ms: i64, to_ms: i64) -> Self {
        Self { from_ms, to_ms }
    }

    pub fn span_ms(&self) -> i64 {
        self.to_ms - self.from_ms
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.from_ms && ts_ms <= self.to_ms
    }

    /// The same-width window ending where this one starts.
    pub fn shifted_back(&self) -> TimeRange {
        let span = self.span_ms();
        TimeRange {
            from_ms: self.from_ms - span,
            to_ms: self.from_ms,
        }
    }
}

/// User-facing range as entered: either absolute bounds or offsets relative
/// to "now". The raw form is what round-trips through URL persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawTimeRange {
    Absolute { from_ms: i64, to_ms: i64 },
    Relative { from_offset_ms: i64, to_offset_ms: i64 },
}

impl RawTimeRange {
    /// Last hour, the default exploration window.
    pub fn last_hour() -> Self {
        RawTimeRange::Relative {
            from_offset_ms: HOUR_MS,
            to_offset_ms: 0,
        }
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> TimeRange {
        let now_ms = now.timestamp_millis();
        match self {
            RawTimeRange::Absolute { from_ms, to_ms } => TimeRange::new(*from_ms, *to_ms),
            RawTimeRange::Relative {
                from_offset_ms,
                to_offset_ms,
            } => TimeRange::new(now_ms - from_offset_ms, now_ms - to_offset_ms),
        }
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, RawTimeRange::Relative { .. })
    }
}

impl From<TimeRange> for RawTimeRange {
    fn from(range: TimeRange) -> Self {
        RawTimeRange::Absolute {
            from_ms: range.from_ms,
            to_ms: range.to_ms,
        }
    }
}
