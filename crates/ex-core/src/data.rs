//! The data-source contract consumed by the batch runner and the streaming
//! subscription manager. Concrete sources live in `ex-data`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::frame::SeriesFrame;
use crate::query::Query;
use crate::range::TimeRange;

/// Raw socket payload; shape is owned by the backend.
pub type RawMessage = serde_json::Value;

/// Stable identity and defaults for one data source instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceMeta {
    /// Stable id; the staleness check compares this against the pane's
    /// current source when a batch completes.
    pub id: String,
    pub name: String,
    /// Suggested minimum query interval, passed through in requests.
    pub interval: Option<Duration>,
}

impl DataSourceMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            interval: None,
        }
    }
}

/// Declared calling convention. The runner branches on this descriptor,
/// never on the shape of a returned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySupport {
    /// `query()` returns one complete result.
    RequestResponse,
    /// `stream_query()` delivers events until a terminal `Done`/`Error`.
    Streaming,
}

/// Outcome of a pre-flight connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub ok: bool,
    pub message: String,
}

impl TestResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: "data source is working".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// One batch worth of queries with resolved options, snapshotted at launch.
#[derive(Debug, Clone)]
pub struct DataQueryRequest {
    pub queries: Vec<Query>,
    pub range: TimeRange,
    pub interval: Option<Duration>,
    pub max_data_points: usize,
    pub live: bool,
}

/// A complete (or partial, when streamed) set of frames for one batch.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub frames: Vec<SeriesFrame>,
}

impl QueryResult {
    pub fn new(frames: Vec<SeriesFrame>) -> Self {
        Self { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(|f| f.is_empty())
    }
}

/// Lifecycle events delivered by a streaming query. The request/response
/// convention is bridged into the same shape by the runner: one terminal
/// event, nothing else.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental delta frames; the result processor accumulates them.
    Partial(Vec<SeriesFrame>),
    /// Terminal success carrying the full result.
    Done(QueryResult),
    /// Terminal failure carrying the raw backend payload.
    Error(RawMessage),
}

/// Unsubscribe handle returned by `stream_query`. Dropping the handle
/// cancels the backend stream; `unsubscribe` does so explicitly.
#[derive(Debug)]
pub struct StreamHandle {
    token: CancellationToken,
}

impl StreamHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// One live-mode connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub url: String,
    /// Query key this target feeds; the subscription key within a pane.
    pub key: String,
}

/// A pluggable backend. Sources declare their calling convention through
/// `query_support`; live-mode hooks are optional and default to absent.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    fn meta(&self) -> &DataSourceMeta;

    fn query_support(&self) -> QuerySupport {
        QuerySupport::RequestResponse
    }

    /// Pre-flight check used to fail fast before the first run.
    async fn test(&self) -> anyhow::Result<TestResult>;

    /// Request/response execution: one call, one complete result.
    async fn query(&self, request: &DataQueryRequest) -> anyhow::Result<QueryResult>;

    /// Streaming execution: deliver events into `events` until a terminal
    /// event or until the returned handle is unsubscribed.
    async fn stream_query(
        &self,
        request: &DataQueryRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<StreamHandle> {
        let _ = (request, events);
        anyhow::bail!("{} does not support streaming queries", self.meta().name)
    }

    /// Live-mode targets; `None` disables subscriptions for this source.
    fn stream_targets(&self, request: &DataQueryRequest) -> Option<Vec<StreamTarget>> {
        let _ = request;
        None
    }

    /// Converts one raw socket message into a delta frame. Sources without
    /// this hook have their socket messages silently ignored.
    fn series_from_message(&self, message: &RawMessage, key: &str) -> Option<SeriesFrame> {
        let _ = (message, key);
        None
    }
}
