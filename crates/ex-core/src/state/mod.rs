//! Per-pane exploration state. The pane state is exclusively owned by its
//! reducer methods here; the engine mutates it only through them, under one
//! write lock per transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::data::DataSource;
use crate::error::QueryError;
use crate::query::{HistoryEntry, KeyRegistry, Query, RefreshInterval};
use crate::range::{RawTimeRange, TimeRange};
use crate::results::{GraphResult, LogsResult, TableResult};

/// Default display width used as the requested resolution hint.
pub const DEFAULT_WIDTH: usize = 500;

/// One of the two exploration panes. The right pane is only live while
/// split view is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaneId {
    Left,
    Right,
}

impl PaneId {
    pub const ALL: [PaneId; 2] = [PaneId::Left, PaneId::Right];
}

impl std::fmt::Display for PaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaneId::Left => write!(f, "left"),
            PaneId::Right => write!(f, "right"),
        }
    }
}

/// Range-shift closure installed while scanning.
pub type RangeShift = Arc<dyn Fn(&TimeRange) -> TimeRange + Send + Sync>;

/// Immutable-results, mutable-flags state of one exploration pane.
pub struct PaneState {
    pub datasource: Option<Arc<dyn DataSource>>,
    pub queries: Vec<Query>,
    pub keys: KeyRegistry,
    pub raw_range: RawTimeRange,
    pub range: TimeRange,
    pub width: usize,
    pub refresh: RefreshInterval,
    pub show_graph: bool,
    pub show_table: bool,
    pub show_logs: bool,
    pub is_paused: bool,
    pub loading: bool,
    pub latency: Option<Duration>,
    /// Generation counter; completions carrying an older epoch are ignored.
    pub batch_epoch: u64,
    /// Persistent configuration error; blocks running until the source
    /// changes.
    pub config_error: Option<QueryError>,
    /// Last execution error, scoped to a query row when keyed.
    pub error: Option<QueryError>,
    pub graph: GraphResult,
    pub table: TableResult,
    pub logs: LogsResult,
    /// Recall copy of the persisted history for the active source.
    pub history: Vec<HistoryEntry>,
    /// Present exactly while scanning; the pairing of the scanning flag and
    /// the shift closure cannot diverge.
    scan: Option<RangeShift>,
}

impl Default for PaneState {
    fn default() -> Self {
        Self::new()
    }
}

impl PaneState {
    pub fn new() -> Self {
        let raw_range = RawTimeRange::last_hour();
        let range = raw_range.resolve(Utc::now());
        let mut keys = KeyRegistry::new();
        let first = keys.next_key();
        Self {
            datasource: None,
            queries: vec![Query::new(first, "")],
            keys,
            raw_range,
            range,
            width: DEFAULT_WIDTH,
            refresh: RefreshInterval::Off,
            show_graph: true,
            show_table: true,
            show_logs: true,
            is_paused: false,
            loading: false,
            latency: None,
            batch_epoch: 0,
            config_error: None,
            error: None,
            graph: GraphResult::default(),
            table: TableResult::default(),
            logs: LogsResult::default(),
            history: Vec::new(),
            scan: None,
        }
    }

    pub fn datasource_id(&self) -> Option<String> {
        self.datasource.as_ref().map(|ds| ds.meta().id.clone())
    }

    pub fn is_live(&self) -> bool {
        self.refresh.is_live()
    }

    pub fn has_runnable_queries(&self) -> bool {
        self.queries.iter().any(|q| !q.is_blank())
    }

    /// Snapshot of the rows a batch should execute.
    pub fn runnable_queries(&self) -> Vec<Query> {
        self.queries
            .iter()
            .filter(|q| q.is_runnable())
            .cloned()
            .collect()
    }

    /// Highlighting placeholders for log rows.
    pub fn search_words(&self) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for query in &self.queries {
            for word in query.expr.split_whitespace() {
                if !words.iter().any(|w| w == word) {
                    words.push(word.to_string());
                }
            }
        }
        words
    }

    pub fn add_query(&mut self, expr: impl Into<String>) -> String {
        let key = self.keys.next_key();
        self.queries.push(Query::new(key.clone(), expr));
        key
    }

    pub fn modify_query(&mut self, key: &str, expr: impl Into<String>) -> bool {
        match self.queries.iter_mut().find(|q| q.key == key) {
            Some(query) => {
                query.expr = expr.into();
                true
            }
            None => false,
        }
    }

    pub fn remove_query(&mut self, key: &str) {
        self.queries.retain(|q| q.key != key);
        self.keys.release(key);
        if self.queries.is_empty() {
            let first = self.keys.next_key();
            self.queries.push(Query::new(first, ""));
        }
    }

    /// Replaces all rows, re-keying from a fresh registry. An empty list
    /// leaves one blank row so the pane always has an editable row.
    pub fn set_queries(&mut self, exprs: Vec<String>) {
        self.keys.reset();
        self.queries = exprs
            .into_iter()
            .map(|expr| {
                let key = self.keys.next_key();
                Query::new(key, expr)
            })
            .collect();
        if self.queries.is_empty() {
            let first = self.keys.next_key();
            self.queries.push(Query::new(first, ""));
        }
    }

    pub fn set_raw_range(&mut self, raw: RawTimeRange) {
        self.range = raw.resolve(Utc::now());
        self.raw_range = raw;
    }

    pub fn clear_results(&mut self) {
        self.graph = GraphResult::default();
        self.table = TableResult::default();
        self.logs = LogsResult::default();
        self.latency = None;
        self.error = None;
    }

    pub fn scanning(&self) -> bool {
        self.scan.is_some()
    }

    /// Enters scanning and applies the first shift to the current range.
    pub fn start_scan(&mut self, shift: RangeShift) -> TimeRange {
        let next = shift(&self.range);
        self.scan = Some(shift);
        self.range = next;
        self.raw_range = next.into();
        next
    }

    /// Applies one more shift while scanning; `None` when not scanning.
    pub fn shift_range(&mut self) -> Option<TimeRange> {
        let shift = self.scan.as_ref()?;
        let next = shift(&self.range);
        self.range = next;
        self.raw_range = next.into();
        Some(next)
    }

    pub fn stop_scan(&mut self) {
        self.scan = None;
    }
}
