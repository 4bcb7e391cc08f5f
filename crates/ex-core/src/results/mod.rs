//! Result processing: pure transformations from raw frames into the cached
//! graph/table/log view models, with replace-vs-merge semantics.

pub mod logs;

use crate::frame::SeriesFrame;

pub use logs::{logs_result, LogLevel, LogRow, LogsResult, LogsSortOrder, MAX_LOG_ROWS};

/// Whether incoming frames replace the cached result or merge into it.
/// Terminal batch results replace; streamed deltas merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Replace,
    Merge,
}

/// Cached graph view model: strictly two-field (time, value) series.
#[derive(Debug, Clone, Default)]
pub struct GraphResult {
    pub series: Vec<SeriesFrame>,
}

impl GraphResult {
    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.is_empty())
    }

    pub fn total_points(&self) -> usize {
        self.series.iter().map(|s| s.rows()).sum()
    }
}

/// Cached table view model: column-aligned frames, no shape filter.
#[derive(Debug, Clone, Default)]
pub struct TableResult {
    pub frames: Vec<SeriesFrame>,
}

impl TableResult {
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(|f| f.is_empty())
    }
}

pub fn graph_result(
    prev: &GraphResult,
    policy: MergePolicy,
    incoming: &[SeriesFrame],
) -> GraphResult {
    let incoming: Vec<SeriesFrame> = incoming
        .iter()
        .filter(|f| f.is_timeseries())
        .cloned()
        .collect();
    match policy {
        MergePolicy::Replace => GraphResult { series: incoming },
        MergePolicy::Merge => {
            if incoming.is_empty() {
                return prev.clone();
            }
            GraphResult {
                series: merge_frames(&prev.series, &incoming),
            }
        }
    }
}

pub fn table_result(
    prev: &TableResult,
    policy: MergePolicy,
    incoming: &[SeriesFrame],
) -> TableResult {
    match policy {
        MergePolicy::Replace => TableResult {
            frames: incoming.to_vec(),
        },
        MergePolicy::Merge => {
            if incoming.is_empty() {
                return prev.clone();
            }
            TableResult {
                frames: merge_frames(&prev.frames, incoming),
            }
        }
    }
}

/// Merges by (key, name): matching series concatenate old-then-new, series
/// present on only one side carry through unchanged, old order first.
fn merge_frames(old: &[SeriesFrame], new: &[SeriesFrame]) -> Vec<SeriesFrame> {
    let mut used = vec![false; new.len()];
    let mut out = Vec::with_capacity(old.len() + new.len());

    for existing in old {
        let matched = new
            .iter()
            .position(|n| n.key == existing.key && n.name == existing.name);
        match matched {
            Some(index) => {
                used[index] = true;
                out.push(existing.concat(&new[index]));
            }
            None => out.push(existing.clone()),
        }
    }
    for (index, frame) in new.iter().enumerate() {
        if !used[index] {
            out.push(frame.clone());
        }
    }
    out
}
