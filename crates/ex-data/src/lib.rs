//! Data layer for the exploration engine: error taxonomy, backend error
//! normalization, persisted query history, live-channel dialing, and the
//! in-memory source used by tests and demos.

pub mod error;
pub mod history;
pub mod live;
pub mod sources;

use arrow::error::ArrowError;
use thiserror::Error;
use tokio::task::JoinError;

// Re-exports
pub use error::{normalize_query_error, normalize_raw_error};
pub use history::{HistoryStore, MemoryHistory, HISTORY_LIMIT};
pub use live::{ChannelDialer, LiveConnection, LiveSender, LoopbackDialer};
pub use sources::MemorySource;

/// Errors that can occur in data operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Raw rejection payload from a backend; normalized at the boundary
    /// where it is first received.
    #[error("Backend error: {0}")]
    Backend(serde_json::Value),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Join error: {0}")]
    Join(#[from] JoinError),

    #[error("{0} is not supported by this data source")]
    Unsupported(&'static str),

    #[error("Other error: {0}")]
    Other(String),
}
