//! Range scanner continuation.
//!
//! While a pane is scanning, every empty terminal result shifts the range
//! once more and triggers another run; the first non-empty result drops the
//! shift closure and returns the pane to idle. The closure is only ever
//! invoked from here.

use tracing::debug;

use ex_core::PaneId;

use crate::engine::{ExploreEngine, ExploreEvent};

pub(crate) fn continue_after_done(engine: &ExploreEngine, pane: PaneId, result_empty: bool) {
    let next = {
        let mut state = engine.slot(pane).state.write();
        if !state.scanning() {
            return;
        }
        if result_empty {
            state.shift_range()
        } else {
            state.stop_scan();
            None
        }
    };
    match next {
        Some(range) => {
            debug!(%pane, from = range.from_ms, to = range.to_ms, "scan widening");
            engine.run_queries(pane);
        }
        None => engine.emit(ExploreEvent::ScanStopped { pane }),
    }
}
