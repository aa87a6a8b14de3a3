//! Local event dispatch
//!
//! Maps event names to an ordered list of handlers. Cross-node propagation is
//! the broker's job; the bus only ever calls local handlers.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::RwLock;
use servex_common::Params;
use tracing::{debug, error};

/// Handler invoked with the event data
pub type EventHandler = Arc<dyn Fn(&Params) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers for one event run in registration order.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Params) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
        debug!(event = %event, "Event handler registered");
    }

    /// Remove every handler of an event. Returns how many were removed.
    pub fn off(&self, event: &str) -> usize {
        self.handlers
            .write()
            .remove(event)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Names of events with at least one handler
    pub fn event_names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Invoke every handler of `event` in order. A failing or panicking
    /// handler is logged and does not stop the others. Returns the number of
    /// handlers that completed successfully.
    pub fn emit(&self, event: &str, data: &Params) -> usize {
        let handlers = match self.handlers.read().get(event) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        debug!(event = %event, handlers = handlers.len(), "Emitting event");

        let mut delivered = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(data))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!(event = %event, handler = index, error = %e, "Event handler failed");
                }
                Err(_) => {
                    error!(event = %event, handler = index, "Event handler panicked");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.handlers.read().len())
            .finish()
    }
}
