//! Log view model: normalized rows with level classification, a bounded
//! retention window, and refresh-driven sort order.

use arrow::array::{Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MergePolicy;
use crate::frame::{SeriesFrame, LEVEL_FIELD};
use crate::query::RefreshInterval;

/// Retention cap for cached log rows.
pub const MAX_LOG_ROWS: usize = 1000;

const TIME_COLUMN_NAMES: [&str; 4] = ["time", "timestamp", "ts", "created"];
const LINE_COLUMN_NAMES: [&str; 4] = ["line", "message", "entry", "content"];
const LEVEL_COLUMN_NAMES: [&str; 2] = [LEVEL_FIELD, "severity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Trace,
    Unknown,
}

impl LogLevel {
    /// Classifies free text; the first matching marker wins.
    pub fn classify(text: &str) -> LogLevel {
        let lower = text.to_lowercase();
        const MARKERS: [(&str, LogLevel); 8] = [
            ("critical", LogLevel::Critical),
            ("crit", LogLevel::Critical),
            ("error", LogLevel::Error),
            ("err", LogLevel::Error),
            ("warn", LogLevel::Warning),
            ("info", LogLevel::Info),
            ("debug", LogLevel::Debug),
            ("trace", LogLevel::Trace),
        ];
        for (marker, level) in MARKERS {
            if lower.contains(marker) {
                return level;
            }
        }
        LogLevel::Unknown
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// Sort order for cached log rows, driven by the refresh setting: a live
/// tail appends at the bottom, a static view leads with the newest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogsSortOrder {
    Ascending,
    Descending,
}

impl LogsSortOrder {
    pub fn for_refresh(refresh: &RefreshInterval) -> Self {
        if refresh.is_live() {
            LogsSortOrder::Ascending
        } else {
            LogsSortOrder::Descending
        }
    }
}

/// One normalized log row.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    /// Key of the query that produced the row.
    pub key: String,
    pub ts_ms: i64,
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub entry: String,
    /// False for rows carried over from the previous cached result.
    pub fresh: bool,
    /// Highlighting placeholders extracted from the query expressions.
    pub search_words: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogsResult {
    pub rows: Vec<LogRow>,
    pub order: LogsSortOrder,
}

impl Default for LogsResult {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            order: LogsSortOrder::Descending,
        }
    }
}

impl LogsResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn logs_result(
    prev: &LogsResult,
    policy: MergePolicy,
    incoming: &[SeriesFrame],
    order: LogsSortOrder,
    search_words: &[String],
    limit: usize,
) -> LogsResult {
    let mut fresh_rows: Vec<LogRow> = incoming
        .iter()
        .filter(|f| !f.is_timeseries())
        .flat_map(|f| rows_from_frame(f, search_words))
        .collect();

    let mut rows = match policy {
        MergePolicy::Replace => fresh_rows,
        MergePolicy::Merge => {
            let mut carried: Vec<LogRow> = prev
                .rows
                .iter()
                .cloned()
                .map(|mut row| {
                    row.fresh = false;
                    row
                })
                .collect();
            carried.append(&mut fresh_rows);
            carried
        }
    };

    sort_rows(&mut rows, order);
    trim_rows(&mut rows, order, limit);
    LogsResult { rows, order }
}

fn sort_rows(rows: &mut [LogRow], order: LogsSortOrder) {
    match order {
        LogsSortOrder::Ascending => rows.sort_by_key(|r| r.ts_ms),
        LogsSortOrder::Descending => rows.sort_by_key(|r| std::cmp::Reverse(r.ts_ms)),
    }
}

/// Keeps at most `limit` of the most recent rows for either order.
fn trim_rows(rows: &mut Vec<LogRow>, order: LogsSortOrder, limit: usize) {
    if rows.len() <= limit {
        return;
    }
    match order {
        // Newest first: keep the head.
        LogsSortOrder::Descending => rows.truncate(limit),
        // Newest last: keep the tail.
        LogsSortOrder::Ascending => {
            let excess = rows.len() - limit;
            rows.drain(..excess);
        }
    }
}

fn rows_from_frame(frame: &SeriesFrame, search_words: &[String]) -> Vec<LogRow> {
    let batch = &frame.batch;
    let Some(times) = time_column_ms(batch) else {
        return Vec::new();
    };
    let Some(lines) = string_column(batch, &LINE_COLUMN_NAMES) else {
        return Vec::new();
    };
    let levels = string_column(batch, &LEVEL_COLUMN_NAMES);

    let mut rows = Vec::with_capacity(batch.num_rows());
    for index in 0..batch.num_rows() {
        let Some(ts_ms) = times[index] else { continue };
        let Some(time) = DateTime::from_timestamp_millis(ts_ms) else {
            continue;
        };
        let entry = lines.value(index).to_string();
        let level = match levels {
            Some(column) if !column.is_null(index) => LogLevel::classify(column.value(index)),
            _ => LogLevel::classify(&entry),
        };
        rows.push(LogRow {
            key: frame.key.clone(),
            ts_ms,
            time,
            level,
            entry,
            fresh: true,
            search_words: search_words.to_vec(),
        });
    }
    rows
}

/// Millisecond timestamps from the first time-like column, by name first
/// and then by type.
fn time_column_ms(batch: &RecordBatch) -> Option<Vec<Option<i64>>> {
    let schema = batch.schema();
    let index = schema
        .fields()
        .iter()
        .position(|f| {
            TIME_COLUMN_NAMES.contains(&f.name().to_lowercase().as_str())
                && is_time_type(f.data_type())
        })
        .or_else(|| {
            schema
                .fields()
                .iter()
                .position(|f| is_time_type(f.data_type()))
        })?;

    let column = batch.column(index);
    if let Some(array) = column.as_any().downcast_ref::<Int64Array>() {
        return Some((0..array.len()).map(|i| array_value(array, i)).collect());
    }
    if let Some(array) = column.as_any().downcast_ref::<TimestampMillisecondArray>() {
        return Some(
            (0..array.len())
                .map(|i| (!array.is_null(i)).then(|| array.value(i)))
                .collect(),
        );
    }
    None
}

fn array_value(array: &Int64Array, index: usize) -> Option<i64> {
    (!array.is_null(index)).then(|| array.value(index))
}

fn is_time_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int64 | DataType::Timestamp(TimeUnit::Millisecond, _)
    )
}

fn string_column<'a>(batch: &'a RecordBatch, names: &[&str]) -> Option<&'a StringArray> {
    let schema = batch.schema();
    let index = schema
        .fields()
        .iter()
        .position(|f| names.contains(&f.name().to_lowercase().as_str()))?;
    batch.column(index).as_any().downcast_ref::<StringArray>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rows: &[(i64, &str, &str)]) -> SeriesFrame {
        SeriesFrame::log_lines("A", rows)
    }

    #[test]
    fn classify_picks_first_marker() {
        assert_eq!(LogLevel::classify("ERROR: disk full"), LogLevel::Error);
        assert_eq!(LogLevel::classify("warning ahead"), LogLevel::Warning);
        assert_eq!(LogLevel::classify("nothing to see"), LogLevel::Unknown);
    }

    #[test]
    fn replace_sorts_and_bounds() {
        let result = logs_result(
            &LogsResult::default(),
            MergePolicy::Replace,
            &[frame(&[(3, "info", "c"), (1, "info", "a"), (2, "info", "b")])],
            LogsSortOrder::Descending,
            &[],
            2,
        );

        let entries: Vec<&str> = result.rows.iter().map(|r| r.entry.as_str()).collect();
        assert_eq!(entries, vec!["c", "b"]);
        assert!(result.rows.iter().all(|r| r.fresh));
    }

    #[test]
    fn merge_flags_carried_rows_stale() {
        let first = logs_result(
            &LogsResult::default(),
            MergePolicy::Replace,
            &[frame(&[(1, "info", "old")])],
            LogsSortOrder::Ascending,
            &[],
            MAX_LOG_ROWS,
        );
        let merged = logs_result(
            &first,
            MergePolicy::Merge,
            &[frame(&[(2, "info", "new")])],
            LogsSortOrder::Ascending,
            &[],
            MAX_LOG_ROWS,
        );

        assert_eq!(merged.rows.len(), 2);
        assert!(!merged.rows[0].fresh);
        assert!(merged.rows[1].fresh);
        assert_eq!(merged.rows[1].entry, "new");
    }

    #[test]
    fn ascending_trim_keeps_most_recent_tail() {
        let result = logs_result(
            &LogsResult::default(),
            MergePolicy::Replace,
            &[frame(&[(1, "info", "a"), (2, "info", "b"), (3, "info", "c")])],
            LogsSortOrder::Ascending,
            &[],
            2,
        );

        let entries: Vec<&str> = result.rows.iter().map(|r| r.entry.as_str()).collect();
        assert_eq!(entries, vec!["b", "c"]);
    }

    #[test]
    fn live_refresh_sorts_ascending() {
        assert_eq!(
            LogsSortOrder::for_refresh(&RefreshInterval::Live),
            LogsSortOrder::Ascending
        );
        assert_eq!(
            LogsSortOrder::for_refresh(&RefreshInterval::Off),
            LogsSortOrder::Descending
        );
    }

    #[test]
    fn search_words_attach_to_rows() {
        let words = vec!["disk".to_string()];
        let result = logs_result(
            &LogsResult::default(),
            MergePolicy::Replace,
            &[frame(&[(1, "error", "disk full")])],
            LogsSortOrder::Descending,
            &words,
            MAX_LOG_ROWS,
        );
        assert_eq!(result.rows[0].search_words, words);
        assert_eq!(result.rows[0].level, LogLevel::Error);
    }
}
