use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use ex_core::{
    DataSource, PaneId, QueryDataError, QueryDataReceived, QueryResult, RefreshInterval,
    SeriesFrame, StreamEvent, StreamTarget, TimeRange, UNKNOWN_ERROR_MESSAGE,
};
use ex_data::{HistoryStore, LoopbackDialer, MemoryHistory, MemorySource};

use super::{EngineOptions, ExploreEngine, ExploreEvent};

struct Harness {
    engine: Arc<ExploreEngine>,
    events: UnboundedReceiver<ExploreEvent>,
    history: Arc<MemoryHistory>,
    dialer: Arc<LoopbackDialer>,
}

fn harness_with_gap(throttle_gap: Duration) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let history = Arc::new(MemoryHistory::new());
    let dialer = Arc::new(LoopbackDialer::new());
    let engine = ExploreEngine::with_options(
        EngineOptions { throttle_gap },
        history.clone(),
        dialer.clone(),
    );
    let events = engine.take_events().unwrap();
    Harness {
        engine,
        events,
        history,
        dialer,
    }
}

fn harness() -> Harness {
    harness_with_gap(Duration::ZERO)
}

/// Lets spawned work and timers run; the paused clock auto-advances.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn drain(events: &mut UnboundedReceiver<ExploreEvent>) -> Vec<ExploreEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn target(key: &str) -> StreamTarget {
    StreamTarget {
        url: format!("live/{key}"),
        key: key.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_queries_clear_without_backend_calls() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("prom"));
    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, Vec::new());
    drain(&mut h.events);

    h.engine.run_queries(PaneId::Left);
    settle().await;

    let events = drain(&mut h.events);
    assert!(matches!(
        events[0],
        ExploreEvent::QueriesCleared { pane: PaneId::Left }
    ));
    assert!(matches!(
        events[1],
        ExploreEvent::StatePersistRequested { pane: PaneId::Left }
    ));
    assert_eq!(events.len(), 2);
    assert_eq!(source.query_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn configuration_error_blocks_running() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("prom").with_test_failure("access denied"));
    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["up".into()]);
    drain(&mut h.events);

    h.engine.run_queries(PaneId::Left);
    settle().await;

    assert!(drain(&mut h.events).is_empty());
    assert_eq!(source.query_calls(), 0);
    let state = h.engine.pane_state(PaneId::Left);
    assert_eq!(
        state.read().config_error.as_ref().unwrap().message,
        "access denied"
    );
}

#[tokio::test(start_paused = true)]
async fn request_response_success_flows_through_lifecycle() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("prom"));
    source.queue_frames(vec![SeriesFrame::points("A", "cpu", &[(1, 1.0), (2, 2.0)])]);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    h.engine.bridge().on::<QueryDataReceived>(move |event| {
        sink.lock().push((event.key.clone(), event.frames.len()));
    });

    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["up".into()]);
    drain(&mut h.events);

    h.engine.run_queries(PaneId::Left);
    settle().await;

    let events = drain(&mut h.events);
    let started = events
        .iter()
        .position(|e| matches!(e, ExploreEvent::QueryStarted { .. }))
        .unwrap();
    let history_updated = events
        .iter()
        .position(|e| matches!(e, ExploreEvent::HistoryUpdated { .. }))
        .unwrap();
    let results = events
        .iter()
        .position(|e| matches!(e, ExploreEvent::ResultsReceived { .. }))
        .unwrap();
    assert!(started < history_updated && history_updated < results);

    let state = h.engine.pane_state(PaneId::Left);
    {
        let state = state.read();
        assert!(!state.loading);
        assert!(state.latency.is_some());
        assert_eq!(state.graph.series.len(), 1);
        assert_eq!(state.graph.series[0].time_values(), vec![1, 2]);
        assert_eq!(state.history.len(), 1);
    }
    let entries = h.history.entries("prom");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].queries, vec!["up"]);

    assert_eq!(received.lock().as_slice(), &[("A".to_string(), 1)]);
}

#[tokio::test(start_paused = true)]
async fn streaming_partials_merge_then_done_replaces() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("metrics").streaming());
    source.queue_stream_script(vec![
        StreamEvent::Partial(vec![SeriesFrame::points("A", "cpu", &[(1, 1.0)])]),
        StreamEvent::Done(QueryResult::new(vec![SeriesFrame::points(
            "A",
            "cpu",
            &[(10, 1.0), (20, 2.0)],
        )])),
    ]);

    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["rate(x)".into()]);
    drain(&mut h.events);

    h.engine.run_queries(PaneId::Left);
    settle().await;

    let events = drain(&mut h.events);
    let partial = events
        .iter()
        .position(|e| matches!(e, ExploreEvent::ResultsPartial { .. }))
        .unwrap();
    let results = events
        .iter()
        .position(|e| matches!(e, ExploreEvent::ResultsReceived { .. }))
        .unwrap();
    assert!(partial < results);

    let state = h.engine.pane_state(PaneId::Left);
    let state = state.read();
    assert_eq!(state.graph.series.len(), 1);
    // The terminal result replaces accumulated partials wholesale.
    assert_eq!(state.graph.series[0].time_values(), vec![10, 20]);
}

#[tokio::test(start_paused = true)]
async fn new_batch_cancels_previous_before_starting() {
    let mut h = harness();
    // No script: the stream stays open until unsubscribed.
    let source = Arc::new(MemorySource::new("metrics").streaming());

    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["rate(x)".into()]);
    drain(&mut h.events);

    h.engine.run_queries(PaneId::Left);
    settle().await;
    h.engine.run_queries(PaneId::Left);
    settle().await;

    assert_eq!(source.stream_starts(), 2);
    // Exactly one cancel: the superseded batch released its backend handle,
    // the replacement is still live.
    assert_eq!(source.stream_cancels(), 1);

    let events = drain(&mut h.events);
    let starts: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ExploreEvent::QueryStarted { epoch, .. } => Some(*epoch),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn stale_completion_is_dropped_silently() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("prom").streaming());
    source.queue_stream_script(vec![StreamEvent::Done(QueryResult::new(vec![
        SeriesFrame::points("A", "cpu", &[(1, 1.0)]),
    ]))]);

    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["up".into()]);
    drain(&mut h.events);

    h.engine.run_queries(PaneId::Left);
    // The datasource identity changes before the spawned batch delivers:
    // the captured id no longer matches and the completion must not touch
    // pane state.
    let other: Arc<dyn DataSource> = Arc::new(MemorySource::new("other"));
    h.engine.pane_state(PaneId::Left).write().datasource = Some(other);
    settle().await;

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ExploreEvent::QueryStarted { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExploreEvent::ResultsReceived { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExploreEvent::HistoryUpdated { .. })));

    let state = h.engine.pane_state(PaneId::Left);
    assert!(state.read().graph.series.is_empty());
    assert!(h.history.entries("prom").is_empty());
}

#[tokio::test(start_paused = true)]
async fn scan_stops_on_first_non_empty_result() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("db"));
    source.queue_frames(Vec::new());
    source.queue_frames(Vec::new());
    source.queue_frames(vec![SeriesFrame::points("A", "rows", &[(5, 1.0)])]);

    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["select * from t".into()]);
    let initial = h.engine.pane_state(PaneId::Left).read().range;
    drain(&mut h.events);

    h.engine
        .start_scan(PaneId::Left, Arc::new(|r: &TimeRange| r.shifted_back()));
    for _ in 0..10 {
        settle().await;
    }

    assert_eq!(source.query_calls(), 3);
    assert!(!h.engine.pane_state(PaneId::Left).read().scanning());

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ExploreEvent::ScanStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ExploreEvent::ScanStopped { .. })));

    // Each run widened one step further back.
    let requests = source.seen_requests();
    let first = initial.shifted_back();
    let second = first.shifted_back();
    let third = second.shifted_back();
    assert_eq!(requests[0].range, first);
    assert_eq!(requests[1].range, second);
    assert_eq!(requests[2].range, third);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_scan_returns_to_idle() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("db"));
    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["q".into()]);
    drain(&mut h.events);

    {
        let state = h.engine.pane_state(PaneId::Left);
        state
            .write()
            .start_scan(Arc::new(|r: &TimeRange| r.shifted_back()));
    }
    h.engine.stop_scan(PaneId::Left);

    assert!(!h.engine.pane_state(PaneId::Left).read().scanning());
    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ExploreEvent::ScanStopped { pane: PaneId::Left })));
}

#[tokio::test(start_paused = true)]
async fn live_subscription_stops_on_datasource_change_only_for_that_pane() {
    let mut h = harness();
    let left_source =
        Arc::new(MemorySource::new("stream-left").with_targets(vec![target("A")]));
    h.engine
        .set_datasource(PaneId::Left, left_source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["tail".into()]);
    h.engine
        .set_refresh_interval(PaneId::Left, RefreshInterval::Live);
    settle().await;
    assert_eq!(h.dialer.connections().len(), 1);

    h.engine.open_split();
    let right_source =
        Arc::new(MemorySource::new("stream-right").with_targets(vec![target("A")]));
    h.engine
        .set_datasource(PaneId::Right, right_source.clone())
        .await;
    h.engine.set_queries(PaneId::Right, vec!["tail".into()]);
    h.engine.run_queries(PaneId::Right);
    settle().await;
    assert_eq!(h.dialer.connections().len(), 2);

    let left_sender = h.dialer.connections()[0].1.clone();
    let right_sender = h.dialer.connections()[1].1.clone();
    drain(&mut h.events);

    assert!(
        left_sender
            .send(json!({"name": "cpu", "points": [[1, 1.0]]}))
            .await
    );
    settle().await;
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, ExploreEvent::LiveMessage { pane: PaneId::Left, .. })));

    // Datasource change on the left tears down only the left subscription.
    let replacement: Arc<dyn DataSource> = Arc::new(MemorySource::new("other"));
    h.engine.set_datasource(PaneId::Left, replacement).await;
    settle().await;
    assert!(
        !left_sender
            .send(json!({"name": "cpu", "points": [[2, 2.0]]}))
            .await
    );

    drain(&mut h.events);
    assert!(
        right_sender
            .send(json!({"name": "cpu", "points": [[3, 3.0]]}))
            .await
    );
    settle().await;
    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ExploreEvent::LiveMessage { pane: PaneId::Right, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExploreEvent::LiveMessage { pane: PaneId::Left, .. })));
}

#[tokio::test(start_paused = true)]
async fn leaving_live_cancels_streaming_batch_and_subscriptions() {
    let mut h = harness();
    let source = Arc::new(
        MemorySource::new("stream")
            .streaming()
            .with_targets(vec![target("A")]),
    );
    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["tail".into()]);
    h.engine
        .set_refresh_interval(PaneId::Left, RefreshInterval::Live);
    settle().await;
    assert_eq!(source.stream_starts(), 1);
    assert_eq!(source.stream_cancels(), 0);
    let sender = h.dialer.last_sender_for("A").unwrap();

    h.engine
        .set_refresh_interval(PaneId::Left, RefreshInterval::Every(Duration::from_secs(5)));
    settle().await;

    assert_eq!(source.stream_cancels(), 1);
    assert!(!sender.send(json!({"name": "cpu", "points": [[1, 1.0]]})).await);
    assert!(!h.engine.pane_state(PaneId::Left).read().loading);
}

#[tokio::test(start_paused = true)]
async fn live_messages_pass_the_throttle_gate() {
    let mut h = harness_with_gap(Duration::from_secs(1));
    let source = Arc::new(MemorySource::new("stream").with_targets(vec![target("A")]));
    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["tail".into()]);
    h.engine
        .set_refresh_interval(PaneId::Left, RefreshInterval::Live);
    settle().await;
    let sender = h.dialer.last_sender_for("A").unwrap();
    drain(&mut h.events);

    // First message passes, a second inside the window is dropped, a third
    // past the window passes again.
    assert!(sender.send(json!({"name": "cpu", "points": [[1, 1.0]]})).await);
    settle().await;
    assert!(sender.send(json!({"name": "cpu", "points": [[2, 2.0]]})).await);
    settle().await;
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(sender.send(json!({"name": "cpu", "points": [[3, 3.0]]})).await);
    settle().await;

    let live_events = drain(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, ExploreEvent::LiveMessage { .. }))
        .count();
    assert_eq!(live_events, 2);

    let state = h.engine.pane_state(PaneId::Left);
    let state = state.read();
    assert_eq!(state.graph.series[0].time_values(), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn paused_pane_keeps_subscription_but_applies_nothing() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("stream").with_targets(vec![target("A")]));
    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["tail".into()]);
    h.engine
        .set_refresh_interval(PaneId::Left, RefreshInterval::Live);
    settle().await;
    let sender = h.dialer.last_sender_for("A").unwrap();
    drain(&mut h.events);

    h.engine.set_live_paused(PaneId::Left, true);
    assert!(sender.send(json!({"name": "cpu", "points": [[1, 1.0]]})).await);
    settle().await;
    assert!(drain(&mut h.events)
        .iter()
        .all(|e| !matches!(e, ExploreEvent::LiveMessage { .. })));
    assert!(h.engine.pane_state(PaneId::Left).read().graph.series.is_empty());

    h.engine.set_live_paused(PaneId::Left, false);
    assert!(sender.send(json!({"name": "cpu", "points": [[2, 2.0]]})).await);
    settle().await;
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, ExploreEvent::LiveMessage { .. })));
    assert_eq!(
        h.engine
            .pane_state(PaneId::Left)
            .read()
            .graph
            .series[0]
            .time_values(),
        vec![2]
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_error_shape_normalizes_and_reaches_the_bridge() {
    let mut h = harness();
    let source = Arc::new(MemorySource::new("prom"));
    source.queue_error(json!({"weird": [1, 2, 3]}));

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    h.engine.bridge().on::<QueryDataError>(move |event| {
        sink.lock().push((event.error.clone(), event.raw.clone()));
    });

    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["up".into()]);
    drain(&mut h.events);

    h.engine.run_queries(PaneId::Left);
    settle().await;

    let events = drain(&mut h.events);
    let failed = events.iter().find_map(|e| match e {
        ExploreEvent::QueryFailed { error, .. } => Some(error.clone()),
        _ => None,
    });
    assert_eq!(failed.unwrap().message, UNKNOWN_ERROR_MESSAGE);

    let state = h.engine.pane_state(PaneId::Left);
    {
        let state = state.read();
        assert!(!state.loading);
        assert_eq!(state.error.as_ref().unwrap().message, UNKNOWN_ERROR_MESSAGE);
    }

    // The original payload still reaches diagnostics through the bridge.
    let failures = failures.lock();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1, Some(json!({"weird": [1, 2, 3]})));
}

#[tokio::test(start_paused = true)]
async fn reset_tears_down_both_panes() {
    let mut h = harness();
    let source = Arc::new(
        MemorySource::new("stream")
            .streaming()
            .with_targets(vec![target("A")]),
    );
    h.engine
        .set_datasource(PaneId::Left, source.clone())
        .await;
    h.engine.set_queries(PaneId::Left, vec!["tail".into()]);
    h.engine
        .set_refresh_interval(PaneId::Left, RefreshInterval::Live);
    settle().await;
    let sender = h.dialer.last_sender_for("A").unwrap();
    drain(&mut h.events);

    h.engine.reset();
    settle().await;

    assert_eq!(source.stream_cancels(), 1);
    assert!(!sender.send(json!({"name": "cpu", "points": [[1, 1.0]]})).await);
    assert!(!h.engine.split_active());
    let state = h.engine.pane_state(PaneId::Left);
    assert!(state.read().datasource.is_none());
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, ExploreEvent::Reset)));
}
