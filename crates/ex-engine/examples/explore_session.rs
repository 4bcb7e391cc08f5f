//! Drives the engine end to end against the in-memory source: one
//! request/response run, then a short live-tail session over the loopback
//! dialer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use ex_core::{PaneId, RefreshInterval, SeriesFrame, StreamTarget};
use ex_data::{LoopbackDialer, MemoryHistory, MemorySource};
use ex_engine::ExploreEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let history = Arc::new(MemoryHistory::new());
    let dialer = Arc::new(LoopbackDialer::new());
    let engine = ExploreEngine::new(history, dialer.clone());
    let mut events = engine.take_events().expect("single event consumer");

    let source = Arc::new(
        MemorySource::new("demo").with_targets(vec![StreamTarget {
            url: "live/cpu".into(),
            key: "A".into(),
        }]),
    );
    source.queue_frames(vec![SeriesFrame::points(
        "A",
        "cpu",
        &[(1000, 0.42), (2000, 0.58)],
    )]);

    engine.set_datasource(PaneId::Left, source).await;
    engine.set_queries(PaneId::Left, vec!["cpu_usage".into()]);
    engine.run_queries(PaneId::Left);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Switch to live tail and feed a few messages through the loopback.
    engine.set_refresh_interval(PaneId::Left, RefreshInterval::Live);
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Some(sender) = dialer.last_sender_for("A") {
        for n in 3..6 {
            sender
                .send(json!({"name": "cpu", "points": [[n * 1000, 0.5]]}))
                .await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    engine.set_refresh_interval(PaneId::Left, RefreshInterval::Off);

    while let Ok(event) = events.try_recv() {
        info!(?event, "lifecycle event");
    }
    let state = engine.pane_state(PaneId::Left);
    let state = state.read();
    println!(
        "pane=left series={} latency={:?}",
        state.graph.series.len(),
        state.latency
    );
    Ok(())
}
