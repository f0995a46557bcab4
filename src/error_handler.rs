//! Error handler: classification, logging, dependent notification, and
//! strategy selection.
//!
//! Classification is a pure function of the error artifact's textual
//! content, mapping onto a small set of retry/escalation behaviors.

use crate::domain::{AgentId, BackoffStrategy, ErrorCategory, RetryPolicy, TaskId, WorkflowId};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, instrument, warn};

/// What to do with a classified error.
#[derive(Debug, Clone)]
pub struct Strategy {
    /// Whether the failure should be retried.
    pub retry: bool,
    /// The retry policy to apply, when `retry` is true.
    pub policy: Option<RetryPolicy>,
    /// Whether dependent agents should be notified.
    pub notify_dependents: bool,
    /// Whether the failure should be escalated to the caller.
    pub escalate: bool,
}

/// Classify a [`crate::error::BusError`] the same way a raw message is
/// classified, by its `Display` text.
#[must_use]
pub fn classify_bus_error(err: &crate::error::BusError) -> ErrorCategory {
    classify(&err.to_string())
}

/// Classify a raw error message into one of the four handled categories
/// using substring heuristics.
#[must_use]
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("validation") || lower.contains("invalid") {
        ErrorCategory::Validation
    } else if lower.contains("system")
        || lower.contains("critical")
        || lower.contains("infrastructure")
    {
        ErrorCategory::System
    } else if lower.contains("business") || lower.contains("logic") {
        ErrorCategory::BusinessLogic
    } else {
        ErrorCategory::Transient
    }
}

/// Strategy applied for each error category, per the fixed strategy table.
#[must_use]
pub fn strategy_for(category: ErrorCategory) -> Strategy {
    match category {
        ErrorCategory::Transient => Strategy {
            retry: true,
            policy: Some(RetryPolicy {
                max_retries: crate::domain::MaxRetries::try_new(3).unwrap_or_default(),
                backoff: BackoffStrategy::Exponential,
                retryable: vec![ErrorCategory::Transient],
                timeout: crate::domain::TimeoutMs::try_new(5000).unwrap_or_default(),
            }),
            notify_dependents: false,
            escalate: false,
        },
        ErrorCategory::Validation => Strategy {
            retry: false,
            policy: None,
            notify_dependents: false,
            escalate: false,
        },
        ErrorCategory::BusinessLogic => Strategy {
            retry: true,
            policy: Some(RetryPolicy {
                max_retries: crate::domain::MaxRetries::try_new(2).unwrap_or_default(),
                backoff: BackoffStrategy::Linear,
                retryable: vec![ErrorCategory::BusinessLogic],
                timeout: crate::domain::TimeoutMs::try_new(3000).unwrap_or_default(),
            }),
            notify_dependents: false,
            escalate: false,
        },
        ErrorCategory::System => Strategy {
            retry: false,
            policy: None,
            notify_dependents: true,
            escalate: true,
        },
    }
}

/// Contextual information attached to every logged error.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Workflow the error occurred in, if any.
    pub workflow_id: Option<WorkflowId>,
    /// Task the error occurred in, if any.
    pub task_id: Option<TaskId>,
    /// Agent the error is attributed to.
    pub agent_id: Option<AgentId>,
    /// Name of the operation that failed.
    pub operation: String,
    /// Free-form extra data.
    pub data: Option<HashMap<String, Value>>,
}

/// A stored, queryable record of a handled error.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Generated unique id for this entry.
    pub log_id: String,
    /// Original error message.
    pub error: String,
    /// Assigned category.
    pub category: ErrorCategory,
    /// Context captured at handling time.
    pub context: ErrorContext,
    /// Wall-clock time the error was handled.
    pub timestamp: SystemTime,
    /// A captured stack trace (best-effort; backtrace capture is
    /// process-wide and may be empty outside of panic unwinding).
    pub stack_trace: String,
}

/// A notification delivered to a dependent agent when a system failure
/// occurs upstream.
#[derive(Debug, Clone)]
pub struct DependentNotification {
    /// Id of the agent whose handler failed.
    pub failed_agent_id: AgentId,
    /// Original error message.
    pub error: String,
    /// Assigned category.
    pub category: ErrorCategory,
    /// Context captured at handling time.
    pub context: ErrorContext,
    /// Wall-clock time of the notification.
    pub timestamp: SystemTime,
}

/// A dependent's notification callback.
pub type NotificationHandler = Arc<dyn Fn(DependentNotification) + Send + Sync>;

/// Classifies, logs, and dispatches dependent notifications for handled
/// errors.
pub struct ErrorHandler {
    log: DashMap<String, LogEntry>,
    next_id: AtomicU64,
    /// dependent -> sources it depends on.
    dependents_of: DashMap<AgentId, HashSet<AgentId>>,
    notification_handlers: DashMap<AgentId, NotificationHandler>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    /// Construct an empty error handler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: DashMap::new(),
            next_id: AtomicU64::new(1),
            dependents_of: DashMap::new(),
            notification_handlers: DashMap::new(),
        }
    }

    /// Register that `dependent` depends on `source`, and how to notify it.
    pub fn register_dependency(
        &self,
        dependent: AgentId,
        source: AgentId,
        handler: NotificationHandler,
    ) {
        self.dependents_of
            .entry(source)
            .or_default()
            .insert(dependent.clone());
        self.notification_handlers.insert(dependent, handler);
    }

    /// Classify, log, and (for system errors) notify dependents of a failure.
    /// Returns the selected strategy so the caller can act on it (e.g. retry).
    #[instrument(skip(self, context))]
    pub async fn handle(&self, error: &str, context: ErrorContext) -> Strategy {
        let category = classify(error);
        let strategy = strategy_for(category);

        let log_id = format!("err-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let entry = LogEntry {
            log_id: log_id.clone(),
            error: error.to_string(),
            category,
            context: context.clone(),
            timestamp: SystemTime::now(),
            stack_trace: std::backtrace::Backtrace::force_capture().to_string(),
        };
        error!(log_id = %log_id, category = ?category, operation = %context.operation, "error handled");
        self.log.insert(log_id, entry);

        if strategy.notify_dependents {
            if let Some(agent_id) = context.agent_id.clone() {
                self.notify_dependents(agent_id, error, category, context)
                    .await;
            }
        }

        strategy
    }

    async fn notify_dependents(
        &self,
        failed_agent_id: AgentId,
        error: &str,
        category: ErrorCategory,
        context: ErrorContext,
    ) {
        let Some(dependents) = self.dependents_of.get(&failed_agent_id) else {
            return;
        };
        let notification = DependentNotification {
            failed_agent_id,
            error: error.to_string(),
            category,
            context,
            timestamp: SystemTime::now(),
        };

        let mut tasks = Vec::new();
        for dependent in dependents.value().clone() {
            if let Some(handler) = self.notification_handlers.get(&dependent) {
                let handler = Arc::clone(handler.value());
                let notification = notification.clone();
                tasks.push(tokio::spawn(async move {
                    // Panics inside a dependent's callback are caught by the
                    // join handle below rather than unwinding into the caller.
                    handler(notification);
                }));
            }
        }
        for task in tasks {
            if let Err(join_err) = task.await {
                warn!(error = %join_err, "dependent notification handler panicked");
            }
        }
    }

    /// Entries logged for a given workflow.
    #[must_use]
    pub fn log_by_workflow(&self, workflow_id: &WorkflowId) -> Vec<LogEntry> {
        self.log
            .iter()
            .filter(|e| {
                e.value()
                    .context
                    .workflow_id
                    .as_ref()
                    .is_some_and(|w| w == workflow_id)
            })
            .map(|e| e.value().clone())
            .collect()
    }

    /// Entries logged for a given agent.
    #[must_use]
    pub fn log_by_agent(&self, agent_id: &AgentId) -> Vec<LogEntry> {
        self.log
            .iter()
            .filter(|e| e.value().context.agent_id.as_ref().is_some_and(|a| a == agent_id))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Entries logged under a given category.
    #[must_use]
    pub fn log_by_category(&self, category: ErrorCategory) -> Vec<LogEntry> {
        self.log
            .iter()
            .filter(|e| e.value().category == category)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as O};

    #[test]
    fn classification_heuristics() {
        assert_eq!(classify("validation failed: name"), ErrorCategory::Validation);
        assert_eq!(classify("System out of memory"), ErrorCategory::System);
        assert_eq!(classify("business logic conflict"), ErrorCategory::BusinessLogic);
        assert_eq!(classify("connection refused"), ErrorCategory::Transient);
    }

    #[test]
    fn strategy_table_matches_contract() {
        assert!(strategy_for(ErrorCategory::Transient).retry);
        assert!(!strategy_for(ErrorCategory::Validation).retry);
        assert!(strategy_for(ErrorCategory::BusinessLogic).retry);
        let system = strategy_for(ErrorCategory::System);
        assert!(!system.retry);
        assert!(system.notify_dependents);
        assert!(system.escalate);
    }

    #[tokio::test]
    async fn system_failure_notifies_dependents() {
        let handler = ErrorHandler::new();
        let notified = Arc::new(AtomicBool::new(false));
        let notified_clone = notified.clone();
        handler.register_dependency(
            AgentId::try_new("A").unwrap(),
            AgentId::try_new("B").unwrap(),
            Arc::new(move |_n| {
                notified_clone.store(true, O::SeqCst);
            }),
        );

        handler
            .handle(
                "system failure in handler",
                ErrorContext {
                    workflow_id: None,
                    task_id: None,
                    agent_id: Some(AgentId::try_new("B").unwrap()),
                    operation: "handleMessage".to_string(),
                    data: None,
                },
            )
            .await;

        assert!(notified.load(O::SeqCst));
    }

    #[tokio::test]
    async fn log_entries_are_queryable_by_workflow_agent_and_category() {
        let handler = ErrorHandler::new();
        handler
            .handle(
                "transient network blip",
                ErrorContext {
                    workflow_id: Some(WorkflowId::try_new("w1").unwrap()),
                    task_id: None,
                    agent_id: Some(AgentId::try_new("A").unwrap()),
                    operation: "sendMessage".to_string(),
                    data: None,
                },
            )
            .await;

        assert_eq!(handler.log_by_workflow(&WorkflowId::try_new("w1").unwrap()).len(), 1);
        assert_eq!(handler.log_by_agent(&AgentId::try_new("A").unwrap()).len(), 1);
        assert_eq!(handler.log_by_category(ErrorCategory::Transient).len(), 1);
    }
}
