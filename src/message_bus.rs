//! The message bus: subscription-based routing, broadcast, and policy-driven
//! retry.
//!
//! A concurrent subscription table plus a routing entry point, narrowed to
//! an in-process, in-memory bus with no gossip or persistent storage.

use crate::domain::{BackoffStrategy, ErrorCategory, Message, MessageKind, RetryPolicy, WorkflowId};
use crate::error::BusError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

/// An agent-side handler for delivered messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a delivered message, returning a stable error string on
    /// failure so the bus can classify and retry it.
    async fn handle(&self, message: Message) -> Result<(), String>;
}

struct Subscription {
    kinds: HashSet<MessageKind>,
    handler: Arc<dyn MessageHandler>,
}

/// Outcome of a [`MessageBus::send_with_retry`] call.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Whether the final attempt succeeded.
    pub success: bool,
    /// Number of attempts made.
    pub attempts: u32,
    /// The last error observed, if any attempt failed.
    pub last_error: Option<String>,
}

/// Subscription-based router for [`Message`] values.
pub struct MessageBus {
    subscriptions: DashMap<String, Subscription>,
    history: DashMap<WorkflowId, Mutex<Vec<Message>>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Construct an empty bus with no subscriptions or history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            history: DashMap::new(),
        }
    }

    /// Register a handler for an agent against a set of message kinds.
    /// Re-subscription replaces the prior registration.
    pub fn subscribe(
        &self,
        agent_id: &str,
        kinds: HashSet<MessageKind>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        if agent_id.trim().is_empty() {
            return Err(BusError::InvalidSubscription("agent id is empty".into()));
        }
        if kinds.is_empty() {
            return Err(BusError::InvalidSubscription(
                "kind set must not be empty".into(),
            ));
        }
        self.subscriptions
            .insert(agent_id.to_string(), Subscription { kinds, handler });
        debug!(agent_id, "subscribed");
        Ok(())
    }

    /// Remove all subscriptions for an agent.
    pub fn unsubscribe(&self, agent_id: &str) {
        self.subscriptions.remove(agent_id);
        debug!(agent_id, "unsubscribed");
    }

    /// Whether an agent currently has a subscription.
    #[must_use]
    pub fn has_handlers(&self, agent_id: &str) -> bool {
        self.subscriptions.contains_key(agent_id)
    }

    /// Ordered history of messages routed for a workflow.
    #[must_use]
    pub fn message_history(&self, workflow_id: &WorkflowId) -> Vec<Message> {
        self.history
            .get(workflow_id)
            .map(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }

    fn append_history(&self, message: &Message) {
        let entry = self
            .history
            .entry(message.workflow_id.clone())
            .or_insert_with(|| Mutex::new(Vec::new()));
        entry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
    }

    /// Route a message. If a target is specified, deliver to that one agent;
    /// otherwise deliver to every agent currently subscribed to the kind.
    #[instrument(skip(self, message), fields(message_id = %message.id.as_ref(), kind = ?message.kind))]
    pub async fn route(&self, message: &Message) -> Result<(), BusError> {
        match &message.target_id {
            Some(target) => self.route_directed(message, target.as_ref()).await,
            None => self.route_broadcast(message).await,
        }
    }

    async fn route_directed(&self, message: &Message, target: &str) -> Result<(), BusError> {
        // Recorded before the handler runs so failures remain observable.
        self.append_history(message);

        let handler = {
            let Some(sub) = self.subscriptions.get(target) else {
                return Err(BusError::NoSubscription(target.to_string()));
            };
            if !sub.kinds.contains(&message.kind) {
                return Err(BusError::KindMismatch {
                    agent: target.to_string(),
                    kind: format!("{:?}", message.kind),
                });
            }
            Arc::clone(&sub.handler)
        };

        handler
            .handle(message.clone())
            .await
            .map_err(BusError::HandlerFailed)
    }

    async fn route_broadcast(&self, message: &Message) -> Result<(), BusError> {
        let targets: Vec<Arc<dyn MessageHandler>> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().kinds.contains(&message.kind))
            .map(|entry| Arc::clone(&entry.value().handler))
            .collect();

        if targets.is_empty() {
            debug!(kind = ?message.kind, "broadcast had no subscribers");
            return Ok(());
        }

        self.append_history(message);

        for handler in targets {
            if let Err(err) = handler.handle(message.clone()).await {
                warn!(error = %err, "broadcast handler failed");
            }
        }
        Ok(())
    }

    /// Attempt delivery up to `1 + policy.max_retries` times, sleeping a
    /// backoff delay between attempts. Returns success/attempt-count/last-error
    /// without letting non-retryable categories consume extra attempts.
    pub async fn send_with_retry(
        &self,
        mut message: Message,
        policy: &RetryPolicy,
        base_delay: std::time::Duration,
        classify: impl Fn(&BusError) -> ErrorCategory,
    ) -> DeliveryResult {
        let max_attempts = 1 + policy.max_retries.into_inner();
        let mut last_error = None;
        let mut attempts_made = 0;

        for attempt in 1..=max_attempts {
            attempts_made = attempt;
            let outcome =
                tokio::time::timeout(policy.timeout.as_duration(), self.route(&message)).await;

            let result = match outcome {
                Ok(route_result) => route_result,
                Err(_) => Err(BusError::Timeout(policy.timeout.as_duration())),
            };

            match result {
                Ok(()) => {
                    return DeliveryResult {
                        success: true,
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Err(err) => {
                    let category = classify(&err);
                    last_error = Some(err.to_string());
                    if attempt == max_attempts || !policy.allows_retry(category) {
                        break;
                    }
                    message.metadata.retry_count += 1;
                    let delay = policy.backoff.delay(attempt, base_delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        DeliveryResult {
            success: false,
            attempts: attempts_made,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentId, MessageId, WorkflowId};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _message: Message) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn make_message(id: &str, workflow: &str, target: Option<&str>) -> Message {
        Message::new(
            MessageId::try_new(id).unwrap(),
            MessageKind::TaskRequest,
            WorkflowId::try_new(workflow).unwrap(),
            AgentId::try_new("S").unwrap(),
            target.map(|t| AgentId::try_new(t).unwrap()),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn directed_route_happy_path() {
        let bus = MessageBus::new();
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Arc::new(CountingHandler {
            calls: calls.clone(),
            fail: false,
        });
        bus.subscribe(
            "A",
            HashSet::from([MessageKind::TaskRequest]),
            handler,
        )
        .unwrap();

        let message = make_message("m1", "w1", Some("A"));
        bus.route(&message).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let history = bus.message_history(&WorkflowId::try_new("w1").unwrap());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id.as_ref(), "m1");
    }

    #[tokio::test]
    async fn directed_route_fails_without_subscription() {
        let bus = MessageBus::new();
        let message = make_message("m1", "w1", Some("A"));
        let err = bus.route(&message).await.unwrap_err();
        assert!(matches!(err, BusError::NoSubscription(_)));
    }

    #[tokio::test]
    async fn broadcast_with_zero_subscribers_succeeds_vacuously() {
        let bus = MessageBus::new();
        let message = make_message("m1", "w1", None);
        bus.route(&message).await.unwrap();
        assert!(bus
            .message_history(&WorkflowId::try_new("w1").unwrap())
            .is_empty());
    }

    #[tokio::test]
    async fn retry_exhaustion_makes_max_retries_plus_one_attempts() {
        let bus = MessageBus::new();
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Arc::new(CountingHandler {
            calls: calls.clone(),
            fail: true,
        });
        bus.subscribe("A", HashSet::from([MessageKind::TaskRequest]), handler)
            .unwrap();

        let policy = RetryPolicy::default_policy();
        let message = make_message("m1", "w1", Some("A"));
        let result = bus
            .send_with_retry(
                message,
                &policy,
                std::time::Duration::from_millis(1),
                |_| ErrorCategory::Transient,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
