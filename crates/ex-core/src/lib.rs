//! Core abstractions for the data exploration engine
//!
//! This crate holds the pane state model, the data-source contract, the
//! pure result processor, and the fire-and-forget event bridge. It performs
//! no I/O; sources and the execution engine live in sibling crates.

pub mod data;
pub mod error;
pub mod events;
pub mod frame;
pub mod query;
pub mod range;
pub mod results;
pub mod state;

// Re-export commonly used types
pub use data::{
    DataQueryRequest, DataSource, DataSourceMeta, QueryResult, QuerySupport, RawMessage,
    StreamEvent, StreamHandle, StreamTarget, TestResult,
};
pub use error::{QueryError, UNKNOWN_ERROR_MESSAGE};
pub use events::{EventBus, QueryDataError, QueryDataReceived};
pub use frame::SeriesFrame;
pub use query::{HistoryEntry, KeyRegistry, Query, RefreshInterval};
pub use range::{RawTimeRange, TimeRange};
pub use results::{
    graph_result, logs_result, table_result, GraphResult, LogLevel, LogRow, LogsResult,
    LogsSortOrder, MergePolicy, TableResult, MAX_LOG_ROWS,
};
pub use state::{PaneId, PaneState, RangeShift, DEFAULT_WIDTH};
