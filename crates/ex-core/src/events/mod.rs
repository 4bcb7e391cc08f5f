//! Fire-and-forget event bridge for consumers that cannot participate in
//! the batch lifecycle directly (legacy editors, embedding contexts).
//!
//! Handlers are keyed by event TypeId. Delivery is synchronous and
//! best-effort; nothing in the control flow depends on it.

use std::any::{Any, TypeId};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::data::RawMessage;
use crate::error::QueryError;
use crate::frame::SeriesFrame;
use crate::state::PaneId;

type Handler = Box<dyn Fn(&dyn Any) + Send + Sync>;

pub struct EventBus {
    handlers: Mutex<AHashMap<TypeId, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(AHashMap::new()),
        }
    }

    /// Subscribes a handler for events of type `E`.
    pub fn on<E: Any + Send + Sync>(&self, handler: impl Fn(&E) + Send + Sync + 'static) {
        let erased: Handler = Box::new(move |any| {
            if let Some(event) = any.downcast_ref::<E>() {
                handler(event);
            }
        });
        self.handlers
            .lock()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(erased);
    }

    /// Delivers `event` to every handler registered for its type.
    pub fn emit<E: Any + Send + Sync>(&self, event: &E) {
        let handlers = self.handlers.lock();
        if let Some(list) = handlers.get(&TypeId::of::<E>()) {
            for handler in list {
                handler(event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One completed query: emitted once per query in a finished batch.
#[derive(Debug, Clone)]
pub struct QueryDataReceived {
    pub pane: PaneId,
    pub key: String,
    pub frames: Vec<SeriesFrame>,
}

/// One failed query, with the original payload for diagnostics when the
/// failure could not be classified.
#[derive(Debug, Clone)]
pub struct QueryDataError {
    pub pane: PaneId,
    pub error: QueryError,
    pub raw: Option<RawMessage>,
}
