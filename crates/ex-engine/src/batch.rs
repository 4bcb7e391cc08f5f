//! Query batch runner.
//!
//! One batch executes the snapshotted query set against the active data
//! source. Both calling conventions flow through a single event relay: a
//! streaming source feeds it directly, a request/response source is bridged
//! by an adapter task that emits exactly one terminal event. At most one
//! batch is active per pane; starting a new one cancels the previous token
//! before the new "started" event is emitted.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ex_core::{
    graph_result, logs_result, table_result, DataQueryRequest, DataSource, LogsSortOrder,
    MergePolicy, PaneId, PaneState, QueryDataError, QueryDataReceived, QueryResult, QuerySupport,
    RawMessage, SeriesFrame, StreamEvent, StreamHandle, MAX_LOG_ROWS,
};
use ex_data::{normalize_raw_error, DataError};

use crate::engine::{ExploreEngine, ExploreEvent};
use crate::throttle::Throttle;

const RELAY_BUFFER: usize = 32;

pub(crate) struct BatchHandle {
    pub epoch: u64,
    pub cancel: CancellationToken,
    /// Only streaming batches are cancelled when the refresh interval
    /// leaves live.
    pub streaming: bool,
}

pub(crate) struct BatchContext {
    pub engine: Weak<ExploreEngine>,
    pub pane: PaneId,
    pub epoch: u64,
    /// Data-source identity captured at launch; completions are dropped
    /// when it no longer matches the pane.
    pub datasource_id: String,
    pub query_keys: Vec<String>,
    pub query_texts: Vec<String>,
    pub search_words: Arc<Vec<String>>,
    pub started: Instant,
    pub throttle_gap: Duration,
}

/// Supersedes any previous batch for the pane and launches a new one.
pub(crate) fn start(
    engine: &ExploreEngine,
    pane: PaneId,
    datasource: Arc<dyn DataSource>,
    request: DataQueryRequest,
) {
    let streaming = datasource.query_support() == QuerySupport::Streaming;
    let slot = engine.slot(pane);

    let mut guard = slot.batch.lock();
    if let Some(previous) = guard.take() {
        previous.cancel.cancel();
        debug!(%pane, epoch = previous.epoch, "batch superseded");
    }

    let (epoch, datasource_id, search_words) = {
        let mut state = slot.state.write();
        state.batch_epoch += 1;
        state.loading = true;
        state.error = None;
        (
            state.batch_epoch,
            state.datasource_id().unwrap_or_default(),
            Arc::new(state.search_words()),
        )
    };

    let cancel = CancellationToken::new();
    *guard = Some(BatchHandle {
        epoch,
        cancel: cancel.clone(),
        streaming,
    });
    drop(guard);

    engine.emit(ExploreEvent::QueryStarted { pane, epoch });
    debug!(%pane, epoch, streaming, "query batch started");

    let context = BatchContext {
        engine: engine.weak_ref(),
        pane,
        epoch,
        datasource_id,
        query_keys: request.queries.iter().map(|q| q.key.clone()).collect(),
        query_texts: request.queries.iter().map(|q| q.expr.clone()).collect(),
        search_words,
        started: Instant::now(),
        throttle_gap: engine.throttle_gap(),
    };
    tokio::spawn(run(context, datasource, request, cancel));
}

async fn run(
    context: BatchContext,
    datasource: Arc<dyn DataSource>,
    request: DataQueryRequest,
    cancel: CancellationToken,
) {
    let (relay_tx, mut relay) = mpsc::channel::<StreamEvent>(RELAY_BUFFER);
    let mut backend: Option<StreamHandle> = None;

    match datasource.query_support() {
        QuerySupport::Streaming => match datasource.stream_query(&request, relay_tx).await {
            Ok(handle) => backend = Some(handle),
            Err(err) => {
                if let Some(engine) = context.engine.upgrade() {
                    apply_error(&engine, &context, raw_from_error(err));
                    clear_slot(&engine, &context);
                }
                return;
            }
        },
        QuerySupport::RequestResponse => {
            // Bridge the single-shot convention onto the relay: exactly one
            // terminal event, nothing else.
            let datasource = datasource.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let event = match datasource.query(&request).await {
                    Ok(result) => StreamEvent::Done(result),
                    Err(err) => StreamEvent::Error(raw_from_error(err)),
                };
                let _ = relay_tx.send(event).await;
            });
        }
    }

    let mut throttle = Throttle::new(context.throttle_gap);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Cancellation releases the backend handle, the relay, and
                // the outward stream together; nothing is emitted after
                // this point for this epoch.
                if let Some(handle) = backend.take() {
                    handle.unsubscribe();
                }
                return;
            }
            event = relay.recv() => match event {
                None => break,
                Some(StreamEvent::Partial(frames)) => {
                    if !throttle.allow() {
                        continue;
                    }
                    let Some(engine) = context.engine.upgrade() else { return };
                    apply_partial(&engine, &context, frames);
                }
                Some(StreamEvent::Done(result)) => {
                    let Some(engine) = context.engine.upgrade() else { return };
                    apply_done(&engine, &context, result);
                    break;
                }
                Some(StreamEvent::Error(raw)) => {
                    let Some(engine) = context.engine.upgrade() else { return };
                    apply_error(&engine, &context, raw);
                    break;
                }
            }
        }
    }

    if let Some(handle) = backend.take() {
        handle.unsubscribe();
    }
    if let Some(engine) = context.engine.upgrade() {
        clear_slot(&engine, &context);
    }
}

/// Both staleness guards: the captured data-source identity must still
/// match the pane, and the batch must not have been superseded.
fn still_current(state: &PaneState, context: &BatchContext) -> bool {
    if state.datasource_id().as_deref() != Some(context.datasource_id.as_str()) {
        debug!(pane = %context.pane, "dropping stale completion: data source changed");
        return false;
    }
    if state.batch_epoch != context.epoch {
        debug!(pane = %context.pane, "dropping stale completion: batch superseded");
        return false;
    }
    true
}

/// Streamed delta: merged into the cached results; accumulation lives in
/// the result processor, not here.
pub(crate) fn apply_partial(
    engine: &ExploreEngine,
    context: &BatchContext,
    frames: Vec<SeriesFrame>,
) {
    {
        let mut state = engine.slot(context.pane).state.write();
        if !still_current(&state, context) {
            return;
        }
        let order = LogsSortOrder::for_refresh(&state.refresh);
        state.graph = graph_result(&state.graph, MergePolicy::Merge, &frames);
        state.table = table_result(&state.table, MergePolicy::Merge, &frames);
        state.logs = logs_result(
            &state.logs,
            MergePolicy::Merge,
            &frames,
            order,
            &context.search_words,
            MAX_LOG_ROWS,
        );
    }
    engine.emit(ExploreEvent::ResultsPartial {
        pane: context.pane,
        epoch: context.epoch,
    });
}

/// Terminal success: full replace, history append, bridge notifications,
/// and a possible scan continuation.
pub(crate) fn apply_done(engine: &ExploreEngine, context: &BatchContext, result: QueryResult) {
    let latency = context.started.elapsed();
    let empty = result.is_empty();
    {
        let mut state = engine.slot(context.pane).state.write();
        if !still_current(&state, context) {
            return;
        }
        state.loading = false;
        state.latency = Some(latency);
        let order = LogsSortOrder::for_refresh(&state.refresh);
        state.graph = graph_result(&state.graph, MergePolicy::Replace, &result.frames);
        state.table = table_result(&state.table, MergePolicy::Replace, &result.frames);
        state.logs = logs_result(
            &state.logs,
            MergePolicy::Replace,
            &result.frames,
            order,
            &context.search_words,
            MAX_LOG_ROWS,
        );

        let entry = ex_core::HistoryEntry {
            ts_ms: chrono::Utc::now().timestamp_millis(),
            queries: context.query_texts.clone(),
        };
        engine.history().append(&context.datasource_id, entry);
        state.history = engine.history().entries(&context.datasource_id);
    }

    engine.emit(ExploreEvent::HistoryUpdated {
        pane: context.pane,
        datasource_id: context.datasource_id.clone(),
    });
    engine.emit(ExploreEvent::ResultsReceived {
        pane: context.pane,
        epoch: context.epoch,
        latency,
    });

    // Fire-and-forget, one notification per query.
    let bridge = engine.bridge();
    for key in &context.query_keys {
        let frames: Vec<SeriesFrame> = result
            .frames
            .iter()
            .filter(|frame| &frame.key == key)
            .cloned()
            .collect();
        bridge.emit(&QueryDataReceived {
            pane: context.pane,
            key: key.clone(),
            frames,
        });
    }

    crate::scan::continue_after_done(engine, context.pane, empty);
}

/// Terminal failure: classified here, at the boundary where backend output
/// is first received, and never re-classified downstream.
pub(crate) fn apply_error(engine: &ExploreEngine, context: &BatchContext, raw: RawMessage) {
    let error = normalize_raw_error(&raw);
    {
        let mut state = engine.slot(context.pane).state.write();
        if !still_current(&state, context) {
            return;
        }
        state.loading = false;
        state.error = Some(error.clone());
    }
    warn!(pane = %context.pane, %error, "query batch failed");
    engine.emit(ExploreEvent::QueryFailed {
        pane: context.pane,
        error: error.clone(),
    });
    engine.bridge().emit(&QueryDataError {
        pane: context.pane,
        error,
        raw: Some(raw),
    });
}

fn clear_slot(engine: &ExploreEngine, context: &BatchContext) {
    let mut guard = engine.slot(context.pane).batch.lock();
    if guard.as_ref().is_some_and(|h| h.epoch == context.epoch) {
        *guard = None;
    }
}

/// Raw payload for the error path: backend rejections pass through as-is,
/// anything else becomes a recognizable message object.
fn raw_from_error(err: anyhow::Error) -> RawMessage {
    match err.downcast_ref::<DataError>() {
        Some(DataError::Backend(raw)) => raw.clone(),
        _ => serde_json::json!({ "message": err.to_string() }),
    }
}
