//! In-process typed publish/subscribe for inbound control events.
//!
//! The registry is owned by the session instance - no module-level mutable
//! state - so multiple sessions never cross-talk. Handler identity is the
//! `Arc` pointer: registering the same handler twice stores it once, and
//! removal is idempotent.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// A decoded inbound control-channel message.
///
/// Ephemeral: produced by the transport's message decoder, dispatched once,
/// then discarded. The core holds no history.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// The wire type tag (e.g. "response.created")
    pub event_type: String,
    /// The full decoded message
    pub payload: Value,
}

/// Handler invoked for each event of a subscribed type.
pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Typed publish/subscribe registry keyed by event-type string.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. No-op if already registered.
    pub fn on(&self, event_type: &str, handler: EventHandler) {
        let mut handlers = self.handlers.write();
        let entry = handlers.entry(event_type.to_string()).or_default();
        if entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return;
        }
        entry.push(handler);
    }

    /// Deregister `handler` from `event_type`. No-op if not registered or
    /// the type was never subscribed.
    pub fn off(&self, event_type: &str, handler: &EventHandler) {
        let mut handlers = self.handlers.write();
        if let Some(entry) = handlers.get_mut(event_type) {
            entry.retain(|h| !Arc::ptr_eq(h, handler));
            if entry.is_empty() {
                handlers.remove(event_type);
            }
        }
    }

    /// Synchronously invoke every handler registered for the event's type.
    ///
    /// A panicking handler is logged and isolated: it neither prevents the
    /// remaining handlers from running nor propagates to the caller.
    pub fn emit(&self, event: &InboundEvent) {
        let registered: Vec<EventHandler> = {
            let handlers = self.handlers.read();
            match handlers.get(&event.event_type) {
                Some(entry) => entry.clone(),
                None => return,
            }
        };

        for handler in registered {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    event_type = %event.event_type,
                    "Event handler panicked; continuing dispatch"
                );
            }
        }
    }

    /// Number of handlers registered for a type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Remove every registered handler (teardown).
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: &str) -> InboundEvent {
        InboundEvent {
            event_type: event_type.to_string(),
            payload: serde_json::json!({ "type": event_type }),
        }
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_handler_receives_only_while_registered() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(count.clone());

        // No events before registration.
        bus.emit(&event("response.done"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.on("response.done", handler.clone());
        bus.emit(&event("response.done"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // None after removal.
        bus.off("response.done", &handler);
        bus.emit(&event("response.done"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(count.clone());

        bus.on("error", handler.clone());
        bus.on("error", handler.clone());
        assert_eq!(bus.handler_count("error"), 1);

        bus.emit(&event("error"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_unknown_type_does_not_panic() {
        let bus = EventBus::new();
        let handler: EventHandler = Arc::new(|_| {});
        bus.off("never.registered", &handler);
    }

    #[test]
    fn test_only_matching_type_dispatched() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on("response.created", counting_handler(count.clone()));

        bus.emit(&event("response.done"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.emit(&event("response.created"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.on("error", Arc::new(|_| panic!("subscriber bug")));
        bus.on("error", counting_handler(count.clone()));

        // Must not propagate, and the second handler still runs.
        bus.emit(&event("error"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Future dispatch is unaffected.
        bus.emit(&event("error"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_removes_all() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on("a", counting_handler(count.clone()));
        bus.on("b", counting_handler(count.clone()));

        bus.clear();
        bus.emit(&event("a"));
        bus.emit(&event("b"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
