//! The explore engine: pane slots, the run coordinator, and the action
//! surface the UI drives. Batch execution, live subscriptions, and scanning
//! live in sibling modules; all of them reach back into the engine through
//! weak references so spawned work never keeps the engine alive.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

use ex_core::{
    DataQueryRequest, DataSource, EventBus, PaneId, PaneState, QueryError, RangeShift,
    RawTimeRange, RefreshInterval,
};
use ex_data::{normalize_query_error, ChannelDialer, HistoryStore};

use crate::batch::{self, BatchHandle};
use crate::subscriptions::{self, SubscriptionHandle};

/// Ordered lifecycle events consumed by the UI layer. Within one pane the
/// sequence for a batch is strictly started → (partial)* → (received |
/// failed); cancelled and stale work emits nothing.
#[derive(Debug, Clone)]
pub enum ExploreEvent {
    QueryStarted { pane: PaneId, epoch: u64 },
    HistoryUpdated { pane: PaneId, datasource_id: String },
    ResultsReceived { pane: PaneId, epoch: u64, latency: Duration },
    ResultsPartial { pane: PaneId, epoch: u64 },
    QueryFailed { pane: PaneId, error: QueryError },
    QueriesCleared { pane: PaneId },
    StatePersistRequested { pane: PaneId },
    DatasourceChanged { pane: PaneId, datasource_id: String },
    LiveMessage { pane: PaneId, key: String },
    ScanStarted { pane: PaneId },
    ScanStopped { pane: PaneId },
    SplitOpened,
    SplitClosed,
    Reset,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Minimum spacing between forwarded partial/live messages.
    pub throttle_gap: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            throttle_gap: Duration::from_secs(1),
        }
    }
}

pub(crate) struct PaneSlot {
    pub state: Arc<RwLock<PaneState>>,
    pub batch: Mutex<Option<BatchHandle>>,
    pub subs: Mutex<AHashMap<String, SubscriptionHandle>>,
}

impl PaneSlot {
    fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PaneState::new())),
            batch: Mutex::new(None),
            subs: Mutex::new(AHashMap::new()),
        }
    }
}

pub struct ExploreEngine {
    weak: Weak<ExploreEngine>,
    left: PaneSlot,
    right: PaneSlot,
    events_tx: mpsc::UnboundedSender<ExploreEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ExploreEvent>>>,
    bridge: Arc<EventBus>,
    history: Arc<dyn HistoryStore>,
    dialer: Arc<dyn ChannelDialer>,
    split: AtomicBool,
    subscription_seq: AtomicU64,
    throttle_gap: Duration,
}

impl ExploreEngine {
    pub fn new(history: Arc<dyn HistoryStore>, dialer: Arc<dyn ChannelDialer>) -> Arc<Self> {
        Self::with_options(EngineOptions::default(), history, dialer)
    }

    pub fn with_options(
        options: EngineOptions,
        history: Arc<dyn HistoryStore>,
        dialer: Arc<dyn ChannelDialer>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            left: PaneSlot::new(),
            right: PaneSlot::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            bridge: Arc::new(EventBus::new()),
            history,
            dialer,
            split: AtomicBool::new(false),
            subscription_seq: AtomicU64::new(0),
            throttle_gap: options.throttle_gap,
        })
    }

    /// The lifecycle event stream; a single consumer takes it once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ExploreEvent>> {
        self.events_rx.lock().take()
    }

    pub fn bridge(&self) -> Arc<EventBus> {
        self.bridge.clone()
    }

    /// Shared pane state for UI reads.
    pub fn pane_state(&self, pane: PaneId) -> Arc<RwLock<PaneState>> {
        self.slot(pane).state.clone()
    }

    pub fn split_active(&self) -> bool {
        self.split.load(Ordering::SeqCst)
    }

    // ---- actions -------------------------------------------------------

    /// Installs a data source: cancels in-flight work for the pane, runs the
    /// pre-flight test, and records a persistent configuration error on
    /// failure so the coordinator refuses to run until the source changes.
    pub async fn set_datasource(&self, pane: PaneId, datasource: Arc<dyn DataSource>) {
        self.cancel_batch(pane);
        subscriptions::stop_pane(self, pane);

        let test = datasource.test().await;
        let datasource_id = datasource.meta().id.clone();
        {
            let mut state = self.slot(pane).state.write();
            state.datasource = Some(datasource);
            state.config_error = match test {
                Ok(result) if result.ok => None,
                Ok(result) => Some(QueryError::message(result.message)),
                Err(err) => Some(normalize_query_error(&err, None)),
            };
            state.loading = false;
            state.clear_results();
            state.history = self.history.entries(&datasource_id);
            state.batch_epoch += 1;
        }
        info!(%pane, datasource = %datasource_id, "data source changed");
        self.emit(ExploreEvent::DatasourceChanged {
            pane,
            datasource_id,
        });
    }

    pub fn set_queries(&self, pane: PaneId, exprs: Vec<String>) {
        self.slot(pane).state.write().set_queries(exprs);
    }

    pub fn add_query(&self, pane: PaneId, expr: impl Into<String>) -> String {
        self.slot(pane).state.write().add_query(expr)
    }

    pub fn modify_query(&self, pane: PaneId, key: &str, expr: impl Into<String>) -> bool {
        self.slot(pane).state.write().modify_query(key, expr)
    }

    pub fn remove_query(&self, pane: PaneId, key: &str) {
        self.slot(pane).state.write().remove_query(key);
    }

    pub fn set_range(&self, pane: PaneId, raw: RawTimeRange) {
        self.slot(pane).state.write().set_raw_range(raw);
    }

    pub fn set_width(&self, pane: PaneId, width: usize) {
        self.slot(pane).state.write().width = width;
    }

    pub fn set_visibility(&self, pane: PaneId, graph: bool, table: bool, logs: bool) {
        let mut state = self.slot(pane).state.write();
        state.show_graph = graph;
        state.show_table = table;
        state.show_logs = logs;
    }

    pub fn set_live_paused(&self, pane: PaneId, paused: bool) {
        self.slot(pane).state.write().is_paused = paused;
    }

    /// Changes the refresh setting. Leaving live tears down subscriptions
    /// and cancels a streaming batch (a request/response batch in flight is
    /// unaffected); entering live triggers a run, which opens subscriptions.
    pub fn set_refresh_interval(&self, pane: PaneId, refresh: RefreshInterval) {
        let was_live = {
            let mut state = self.slot(pane).state.write();
            let was_live = state.is_live();
            state.refresh = refresh;
            was_live
        };
        if was_live && !refresh.is_live() {
            info!(%pane, "left live mode");
            subscriptions::stop_pane(self, pane);
            self.cancel_streaming_batch(pane);
        }
        if !was_live && refresh.is_live() {
            self.run_queries(pane);
        }
    }

    /// Clears all query rows (one blank row remains) and cached results.
    pub fn clear_queries(&self, pane: PaneId) {
        self.cancel_batch(pane);
        subscriptions::stop_pane(self, pane);
        self.slot(pane).state.write().set_queries(Vec::new());
        self.signal_cleared(pane);
    }

    /// Global pane reset: stops every batch and subscription on both panes
    /// and restores default state.
    pub fn reset(&self) {
        for pane in PaneId::ALL {
            self.cancel_batch(pane);
            subscriptions::stop_pane(self, pane);
            *self.slot(pane).state.write() = PaneState::new();
        }
        self.split.store(false, Ordering::SeqCst);
        info!("explore state reset");
        self.emit(ExploreEvent::Reset);
    }

    /// Opens split view, seeding the right pane from the left one.
    pub fn open_split(&self) {
        if self.split.swap(true, Ordering::SeqCst) {
            return;
        }
        let (datasource, exprs, raw_range, refresh, width) = {
            let left = self.slot(PaneId::Left).state.read();
            (
                left.datasource.clone(),
                left.queries.iter().map(|q| q.expr.clone()).collect(),
                left.raw_range.clone(),
                left.refresh,
                left.width,
            )
        };
        {
            let mut right = self.slot(PaneId::Right).state.write();
            *right = PaneState::new();
            right.datasource = datasource;
            right.set_queries(exprs);
            right.set_raw_range(raw_range);
            right.refresh = refresh;
            right.width = width;
        }
        self.emit(ExploreEvent::SplitOpened);
    }

    pub fn close_split(&self) {
        if !self.split.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel_batch(PaneId::Right);
        subscriptions::stop_pane(self, PaneId::Right);
        *self.slot(PaneId::Right).state.write() = PaneState::new();
        self.emit(ExploreEvent::SplitClosed);
    }

    /// The run coordinator: decides from current pane state whether queries
    /// run at all, and with what options. Pure decision logic; the batch
    /// runner and subscription manager do the work.
    pub fn run_queries(&self, pane: PaneId) {
        if pane == PaneId::Right && !self.split_active() {
            debug!("ignoring run for inactive right pane");
            return;
        }
        let state = self.slot(pane).state.read();
        if state.config_error.is_some() {
            debug!(%pane, "refusing to run: persistent configuration error");
            return;
        }
        if !state.has_runnable_queries() {
            drop(state);
            self.signal_cleared(pane);
            return;
        }
        let Some(datasource) = state.datasource.clone() else {
            debug!(%pane, "refusing to run: no data source");
            return;
        };
        let live = state.is_live();
        let request = DataQueryRequest {
            queries: state.runnable_queries(),
            range: state.range,
            interval: datasource.meta().interval,
            max_data_points: state.width,
            live,
        };
        drop(state);

        batch::start(self, pane, datasource.clone(), request.clone());
        if live {
            subscriptions::start_live(self, pane, datasource, request);
        }
    }

    /// Enters scanning: installs the shift closure, widens once, runs.
    pub fn start_scan(&self, pane: PaneId, shift: RangeShift) {
        self.slot(pane).state.write().start_scan(shift);
        self.emit(ExploreEvent::ScanStarted { pane });
        self.run_queries(pane);
    }

    pub fn stop_scan(&self, pane: PaneId) {
        self.slot(pane).state.write().stop_scan();
        self.emit(ExploreEvent::ScanStopped { pane });
    }

    // ---- internals -----------------------------------------------------

    pub(crate) fn slot(&self, pane: PaneId) -> &PaneSlot {
        match pane {
            PaneId::Left => &self.left,
            PaneId::Right => &self.right,
        }
    }

    pub(crate) fn emit(&self, event: ExploreEvent) {
        let _ = self.events_tx.send(event);
    }

    pub(crate) fn weak_ref(&self) -> Weak<ExploreEngine> {
        self.weak.clone()
    }

    pub(crate) fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub(crate) fn dialer(&self) -> Arc<dyn ChannelDialer> {
        self.dialer.clone()
    }

    pub(crate) fn throttle_gap(&self) -> Duration {
        self.throttle_gap
    }

    pub(crate) fn next_subscription_id(&self) -> u64 {
        self.subscription_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn cancel_batch(&self, pane: PaneId) {
        let mut guard = self.slot(pane).batch.lock();
        if let Some(handle) = guard.take() {
            handle.cancel.cancel();
            debug!(%pane, epoch = handle.epoch, "batch cancelled");
        }
    }

    /// Cancels only a streaming batch; a request/response batch keeps
    /// running when the refresh interval leaves live.
    fn cancel_streaming_batch(&self, pane: PaneId) {
        let cancelled = {
            let mut guard = self.slot(pane).batch.lock();
            match guard.as_ref() {
                Some(handle) if handle.streaming => {
                    let handle = guard.take();
                    if let Some(handle) = handle {
                        handle.cancel.cancel();
                    }
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            self.slot(pane).state.write().loading = false;
        }
    }

    /// Coordinator signal when no query has target text: reset cached
    /// results, then ask the URL layer to persist the empty state.
    fn signal_cleared(&self, pane: PaneId) {
        {
            let mut state = self.slot(pane).state.write();
            state.clear_results();
            state.loading = false;
        }
        self.emit(ExploreEvent::QueriesCleared { pane });
        self.emit(ExploreEvent::StatePersistRequested { pane });
    }
}

#[cfg(test)]
mod tests;
