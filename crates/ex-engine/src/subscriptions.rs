//! Streaming subscription manager.
//!
//! While a pane is in live mode and its data source exposes stream targets,
//! one connection is held open per (pane, target key). Inbound messages
//! pass the throttle, are converted by the source's message hook (absent
//! hook: silently ignored), and merge into cached results as deltas.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ex_core::{
    graph_result, logs_result, table_result, DataQueryRequest, DataSource, LogsSortOrder,
    MergePolicy, PaneId, SeriesFrame, StreamTarget, MAX_LOG_ROWS,
};
use ex_data::ChannelDialer;

use crate::engine::{ExploreEngine, ExploreEvent};
use crate::throttle::Throttle;

pub(crate) struct SubscriptionHandle {
    /// Distinguishes this subscription from a successor under the same key.
    pub id: u64,
    pub cancel: CancellationToken,
}

struct SubscriptionContext {
    engine: Weak<ExploreEngine>,
    pane: PaneId,
    id: u64,
    datasource: Arc<dyn DataSource>,
    datasource_id: String,
    dialer: Arc<dyn ChannelDialer>,
    target: StreamTarget,
    search_words: Arc<Vec<String>>,
    throttle_gap: Duration,
}

/// Opens one subscription per stream target. A source without stream
/// targets is a no-op, not an error. An existing subscription under the
/// same key is superseded, never double-counted.
pub(crate) fn start_live(
    engine: &ExploreEngine,
    pane: PaneId,
    datasource: Arc<dyn DataSource>,
    request: DataQueryRequest,
) {
    let Some(targets) = datasource.stream_targets(&request) else {
        return;
    };
    let datasource_id = datasource.meta().id.clone();
    let search_words = Arc::new(engine.slot(pane).state.read().search_words());

    for target in targets {
        let cancel = CancellationToken::new();
        let id = engine.next_subscription_id();
        {
            let mut subs = engine.slot(pane).subs.lock();
            let previous = subs.insert(
                target.key.clone(),
                SubscriptionHandle {
                    id,
                    cancel: cancel.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.cancel.cancel();
                debug!(%pane, key = %target.key, "live subscription superseded");
            }
        }
        let context = SubscriptionContext {
            engine: engine.weak_ref(),
            pane,
            id,
            datasource: datasource.clone(),
            datasource_id: datasource_id.clone(),
            dialer: engine.dialer(),
            target,
            search_words: search_words.clone(),
            throttle_gap: engine.throttle_gap(),
        };
        tokio::spawn(run(context, cancel));
    }
}

/// Tears down every subscription of one pane. The global reset and the
/// per-pane triggers (datasource change, leaving live, queries cleared)
/// all land here.
pub(crate) fn stop_pane(engine: &ExploreEngine, pane: PaneId) {
    let mut subs = engine.slot(pane).subs.lock();
    for (key, handle) in subs.drain() {
        handle.cancel.cancel();
        debug!(%pane, %key, "live subscription stopped");
    }
}

async fn run(context: SubscriptionContext, cancel: CancellationToken) {
    let mut connection = match context.dialer.dial(&context.target).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(
                pane = %context.pane,
                key = %context.target.key,
                %err,
                "live channel dial failed"
            );
            remove_entry(&context);
            return;
        }
    };
    info!(
        pane = %context.pane,
        key = %context.target.key,
        url = %context.target.url,
        "live subscription opened"
    );

    let mut throttle = Throttle::new(context.throttle_gap);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                connection.close();
                break;
            }
            message = connection.recv() => {
                let Some(raw) = message else { break };
                if !throttle.allow() {
                    continue;
                }
                let Some(frame) = context
                    .datasource
                    .series_from_message(&raw, &context.target.key)
                else {
                    continue;
                };
                let Some(engine) = context.engine.upgrade() else { break };
                apply_delta(&engine, &context, frame);
            }
        }
    }
    remove_entry(&context);
}

/// Live deltas always merge; a full replace only ever comes from a batch.
fn apply_delta(engine: &ExploreEngine, context: &SubscriptionContext, frame: SeriesFrame) {
    {
        let mut state = engine.slot(context.pane).state.write();
        if state.datasource_id().as_deref() != Some(context.datasource_id.as_str()) {
            debug!(pane = %context.pane, "dropping live message: data source changed");
            return;
        }
        if state.is_paused {
            return;
        }
        let frames = [frame];
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
    engine.emit(ExploreEvent::LiveMessage {
        pane: context.pane,
        key: context.target.key.clone(),
    });
}

/// Drops this subscription's registry entry unless a successor already
/// replaced it.
fn remove_entry(context: &SubscriptionContext) {
    let Some(engine) = context.engine.upgrade() else {
        return;
    };
    let mut subs = engine.slot(context.pane).subs.lock();
    if subs
        .get(&context.target.key)
        .is_some_and(|handle| handle.id == context.id)
    {
        subs.remove(&context.target.key);
    }
}
