//! Event bus: a small synchronous publish/subscribe facility over named
//! topics.
//!
//! Grounded in the same "coordination hub owns a concurrent registry" shape
//! as the message bus rather than a general-purpose event-emitter crate — a
//! handler's panic or error is caught and logged, never propagated to other
//! subscribers or back to the publisher.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Well-known topics the orchestrator publishes to.
pub mod topics {
    /// Published once initialization completes.
    pub const SYSTEM_READY: &str = "system-ready";
    /// Published once shutdown completes.
    pub const SYSTEM_SHUTDOWN: &str = "system-shutdown";
    /// Published whenever an agent's state transitions to error.
    pub const AGENT_ERROR: &str = "agent-error";
    /// Published when the spec loader reports a change.
    pub const SPEC_CHANGED: &str = "spec-changed";
}

/// Payload delivered to event-bus subscribers.
pub type EventPayload = HashMap<String, Value>;

/// A subscriber callback.
pub type EventHandler = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Synchronous named-topic publish/subscribe facility.
pub struct EventBus {
    subscribers: DashMap<String, Vec<EventHandler>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Construct an event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Subscribe a handler to a topic.
    pub fn subscribe(&self, topic: impl Into<String>, handler: EventHandler) {
        self.subscribers.entry(topic.into()).or_default().push(handler);
    }

    /// Publish a payload to every subscriber of a topic. Handler panics or
    /// (by convention) logged errors never abort the fan-out.
    pub fn publish(&self, topic: &str, payload: EventPayload) {
        let Some(handlers) = self.subscribers.get(topic) else {
            return;
        };
        for handler in handlers.value() {
            let handler = Arc::clone(handler);
            let payload_ref = &payload;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload_ref))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                warn!(topic, panic = %message, "event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publish_fans_out_to_every_subscriber() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(
                topics::SYSTEM_READY,
                Arc::new(move |_payload| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        bus.publish(topics::SYSTEM_READY, HashMap::new());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn a_panicking_handler_does_not_stop_the_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            topics::AGENT_ERROR,
            Arc::new(|_payload| panic!("boom")),
        );
        let count_clone = count.clone();
        bus.subscribe(
            topics::AGENT_ERROR,
            Arc::new(move |_payload| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.publish(topics::AGENT_ERROR, HashMap::new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_to_unknown_topic_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish("nonexistent", HashMap::new());
    }
}
