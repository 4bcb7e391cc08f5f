//! In-memory data source.
//!
//! Serves canned results and scripted stream events, with optional
//! artificial latency and call/cancel counters. Backs the engine's tests
//! and demos; also a reference for how a real source implements the
//! contract.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ex_core::{
    DataQueryRequest, DataSource, DataSourceMeta, QueryResult, QuerySupport, RawMessage,
    SeriesFrame, StreamEvent, StreamHandle, StreamTarget, TestResult,
};

use crate::DataError;

enum CannedResponse {
    Frames(Vec<SeriesFrame>),
    Error(RawMessage),
}

/// A scriptable in-memory backend.
pub struct MemorySource {
    meta: DataSourceMeta,
    support: QuerySupport,
    latency: Option<Duration>,
    test_result: TestResult,
    default_frames: Vec<SeriesFrame>,
    responses: Mutex<VecDeque<CannedResponse>>,
    stream_scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    targets: Vec<StreamTarget>,
    requests: Mutex<Vec<DataQueryRequest>>,
    query_calls: AtomicUsize,
    stream_starts: AtomicUsize,
    stream_cancels: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            meta: DataSourceMeta::new(id.clone(), id),
            support: QuerySupport::RequestResponse,
            latency: None,
            test_result: TestResult::ok(),
            default_frames: Vec::new(),
            responses: Mutex::new(VecDeque::new()),
            stream_scripts: Mutex::new(VecDeque::new()),
            targets: Vec::new(),
            requests: Mutex::new(Vec::new()),
            query_calls: AtomicUsize::new(0),
            stream_starts: AtomicUsize::new(0),
            stream_cancels: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.meta.interval = Some(interval);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.support = QuerySupport::Streaming;
        self
    }

    /// Frames served whenever the canned queue is empty.
    pub fn with_frames(mut self, frames: Vec<SeriesFrame>) -> Self {
        self.default_frames = frames;
        self
    }

    pub fn with_targets(mut self, targets: Vec<StreamTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_test_failure(mut self, message: impl Into<String>) -> Self {
        self.test_result = TestResult::error(message);
        self
    }

    /// Queues one successful response; consumed in FIFO order.
    pub fn queue_frames(&self, frames: Vec<SeriesFrame>) {
        self.responses
            .lock()
            .push_back(CannedResponse::Frames(frames));
    }

    /// Queues one failure carrying a raw backend payload.
    pub fn queue_error(&self, raw: RawMessage) {
        self.responses.lock().push_back(CannedResponse::Error(raw));
    }

    /// Queues the event script for the next `stream_query` call. A stream
    /// with no script stays open until unsubscribed.
    pub fn queue_stream_script(&self, events: Vec<StreamEvent>) {
        self.stream_scripts.lock().push_back(events);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn stream_starts(&self) -> usize {
        self.stream_starts.load(Ordering::SeqCst)
    }

    pub fn stream_cancels(&self) -> usize {
        self.stream_cancels.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in call order.
    pub fn seen_requests(&self) -> Vec<DataQueryRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn meta(&self) -> &DataSourceMeta {
        &self.meta
    }

    fn query_support(&self) -> QuerySupport {
        self.support
    }

    async fn test(&self) -> anyhow::Result<TestResult> {
        Ok(self.test_result.clone())
    }

    async fn query(&self, request: &DataQueryRequest) -> anyhow::Result<QueryResult> {
        self.requests.lock().push(request.clone());
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let canned = self.responses.lock().pop_front();
        match canned {
            Some(CannedResponse::Frames(frames)) => Ok(QueryResult::new(frames)),
            Some(CannedResponse::Error(raw)) => Err(DataError::Backend(raw).into()),
            None => Ok(QueryResult::new(self.default_frames.clone())),
        }
    }

    async fn stream_query(
        &self,
        request: &DataQueryRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<StreamHandle> {
        self.requests.lock().push(request.clone());
        self.stream_starts.fetch_add(1, Ordering::SeqCst);

        let script = self.stream_scripts.lock().pop_front().unwrap_or_default();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let cancels = self.stream_cancels.clone();
        let latency = self.latency;

        tokio::spawn(async move {
            for event in script {
                if let Some(latency) = latency {
                    tokio::time::sleep(latency).await;
                }
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    sent = events.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            // Hold the stream open until the handle releases it.
            task_token.cancelled().await;
            cancels.fetch_add(1, Ordering::SeqCst);
        });

        Ok(StreamHandle::new(token))
    }

    fn stream_targets(&self, _request: &DataQueryRequest) -> Option<Vec<StreamTarget>> {
        if self.targets.is_empty() {
            None
        } else {
            Some(self.targets.clone())
        }
    }

    /// Message convention: `{"name", "points": [[ts, value], ...]}` for
    /// series deltas, `{"lines": [[ts, level, line], ...]}` for log deltas.
    fn series_from_message(&self, message: &RawMessage, key: &str) -> Option<SeriesFrame> {
        if let Some(points) = message.get("points").and_then(|p| p.as_array()) {
            let name = message
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or(key)
                .to_string();
            let points: Vec<(i64, f64)> = points
                .iter()
                .filter_map(|pair| {
                    let ts = pair.get(0)?.as_i64()?;
                    let value = pair.get(1)?.as_f64()?;
                    Some((ts, value))
                })
                .collect();
            return Some(SeriesFrame::points(key, name, &points));
        }
        if let Some(lines) = message.get("lines").and_then(|l| l.as_array()) {
            let rows: Vec<(i64, String, String)> = lines
                .iter()
                .filter_map(|row| {
                    let ts = row.get(0)?.as_i64()?;
                    let level = row.get(1)?.as_str()?.to_string();
                    let line = row.get(2)?.as_str()?.to_string();
                    Some((ts, level, line))
                })
                .collect();
            let borrowed: Vec<(i64, &str, &str)> = rows
                .iter()
                .map(|(ts, level, line)| (*ts, level.as_str(), line.as_str()))
                .collect();
            return Some(SeriesFrame::log_lines(key, &borrowed));
        }
        None
    }
}
