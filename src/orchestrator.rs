//! Orchestrator: agent lifecycle, wiring, send/broadcast, and error dispatch.
//!
//! The orchestrator exclusively owns the agent registry, the message bus,
//! the workflow state manager, the resource allocator, the error handler,
//! the debug manager, and the performance monitor — external code reaches
//! them only through this module's public surface.

use crate::agent::{Agent, AgentStateUpdate, HandleOutcome};
use crate::config::CoreConfig;
use crate::debug_manager::{DebugManager, DebugManagerConfig, DeliveryStatus, ReplayResult};
use crate::domain::{
    AgentId, AgentStatus, Message, RetryPolicy, Task, TaskId, WorkflowId, WorkflowState,
};
use crate::error::OrchestratorError;
use crate::error_handler::{classify, classify_bus_error, ErrorContext, ErrorHandler, NotificationHandler};
use crate::event_bus::{topics, EventBus, EventHandler};
use crate::message_bus::{MessageBus, MessageHandler};
use crate::performance_monitor::{AgentProcessingRecord, PerformanceMonitor, PerformanceSummary, RoutingRecord};
use crate::resource_allocator::{ResourceAllocator, ScheduleDecision};
use crate::spec_loader::{SpecChange, SpecLoader, SpecSource};
use crate::workflow_state::{TaskUpdate, WorkflowStateManager, WorkflowUpdate};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{instrument, warn};

struct AgentEntry {
    agent: Arc<dyn Agent>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

/// Wraps an [`Agent`] into a [`MessageHandler`], applying the per-handler
/// wrapper the orchestrator guarantees: pre/post snapshot, error dispatch,
/// status escalation on system-category failure, and processing-time
/// recording.
struct AgentMessageHandler {
    agent: Arc<dyn Agent>,
    lock: Arc<tokio::sync::Mutex<()>>,
    error_handler: Arc<ErrorHandler>,
    performance: Arc<PerformanceMonitor>,
    events: Arc<EventBus>,
}

#[async_trait]
impl MessageHandler for AgentMessageHandler {
    async fn handle(&self, message: Message) -> Result<(), String> {
        let _guard = self.lock.lock().await;

        let _pre_snapshot = self.agent.get_state();
        let start = SystemTime::now();
        let outcome: HandleOutcome = self.agent.handle_message(message.clone()).await;
        let end = SystemTime::now();
        let _post_snapshot = self.agent.get_state();

        self.performance.record_agent_processing(AgentProcessingRecord {
            agent_id: self.agent.id().clone(),
            start,
            end,
            success: outcome.success,
            error: outcome.error.clone(),
        });

        if outcome.success {
            return Ok(());
        }

        let error_text = outcome
            .error
            .clone()
            .unwrap_or_else(|| "agent handler failed".to_string());
        let strategy = self
            .error_handler
            .handle(
                &error_text,
                ErrorContext {
                    workflow_id: Some(message.workflow_id.clone()),
                    task_id: None,
                    agent_id: Some(self.agent.id().clone()),
                    operation: "handleMessage".to_string(),
                    data: None,
                },
            )
            .await;

        if strategy.escalate {
            self.agent.set_state(AgentStateUpdate {
                status: Some(AgentStatus::Error),
            });
            let mut payload = HashMap::new();
            payload.insert("agent_id".to_string(), Value::from(self.agent.id().as_ref().to_string()));
            payload.insert("error".to_string(), Value::from(error_text.clone()));
            self.events.publish(topics::AGENT_ERROR, payload);
        }

        Err(error_text)
    }
}

/// Coordinates the message bus, workflow state manager, error handler,
/// resource allocator, debug manager, and performance monitor behind one
/// public surface.
pub struct Orchestrator {
    agents: dashmap::DashMap<AgentId, AgentEntry>,
    bus: Arc<MessageBus>,
    workflows: Arc<WorkflowStateManager>,
    allocator: Arc<ResourceAllocator>,
    error_handler: Arc<ErrorHandler>,
    debug: Arc<DebugManager>,
    performance: Arc<PerformanceMonitor>,
    events: Arc<EventBus>,
    initialized: AtomicBool,
    config: CoreConfig,
}

impl Orchestrator {
    /// Construct an orchestrator from the given configuration. No agents are
    /// registered and the orchestrator starts uninitialized.
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        let debug_config = DebugManagerConfig {
            enabled: config.debug_enabled,
            log_messages: config.log_messages,
            log_routing: config.log_routing,
            log_agent_state: config.log_agent_state,
            log_workflow_state: config.log_workflow_state,
        };
        Self {
            agents: dashmap::DashMap::new(),
            bus: Arc::new(MessageBus::new()),
            workflows: Arc::new(WorkflowStateManager::new()),
            allocator: Arc::new(ResourceAllocator::new(
                Duration::from_millis(config.starvation_threshold_ms),
                config.priority_boost_for_starved as f64,
            )),
            error_handler: Arc::new(ErrorHandler::new()),
            debug: Arc::new(DebugManager::new(debug_config)),
            performance: Arc::new(PerformanceMonitor::new(config.max_history_size)),
            events: Arc::new(EventBus::new()),
            initialized: AtomicBool::new(false),
            config,
        }
    }

    fn make_handler(&self, entry: &AgentEntry) -> Arc<dyn MessageHandler> {
        Arc::new(AgentMessageHandler {
            agent: Arc::clone(&entry.agent),
            lock: Arc::clone(&entry.lock),
            error_handler: Arc::clone(&self.error_handler),
            performance: Arc::clone(&self.performance),
            events: Arc::clone(&self.events),
        })
    }

    fn subscribe_agent(&self, id: &AgentId) -> Result<(), OrchestratorError> {
        let entry = self
            .agents
            .get(id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.clone().into_inner()))?;

        let kinds: std::collections::HashSet<_> = crate::agent::all_message_kinds()
            .into_iter()
            .filter(|kind| entry.agent.can_handle(*kind))
            .collect();

        if kinds.is_empty() {
            return Ok(());
        }

        let handler = self.make_handler(&entry);
        self.bus.subscribe(id.as_ref(), kinds, handler)?;
        match self.allocator.register_agent(id.clone()) {
            Ok(()) | Err(crate::error::AllocatorError::AlreadyRegistered(_)) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Register an agent. Fails if its id is already registered. If the
    /// orchestrator is already initialized, the agent is initialized and
    /// subscribed immediately.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<(), OrchestratorError> {
        let id = agent.id().clone();
        if self.agents.contains_key(&id) {
            return Err(OrchestratorError::AgentAlreadyRegistered(id.into_inner()));
        }

        self.agents.insert(
            id.clone(),
            AgentEntry {
                agent: Arc::clone(&agent),
                lock: Arc::new(tokio::sync::Mutex::new(())),
            },
        );

        if self.initialized.load(Ordering::SeqCst) {
            agent
                .initialize()
                .await
                .map_err(OrchestratorError::AgentInitFailed)?;
            self.subscribe_agent(&id)?;
        }
        Ok(())
    }

    /// Deregister an agent, removing its subscription and queue.
    pub fn deregister_agent(&self, id: &AgentId) {
        self.agents.remove(id);
        self.bus.unsubscribe(id.as_ref());
        self.allocator.deregister_agent(id);
    }

    /// Initialize every registered agent in parallel and subscribe each to
    /// the message kinds it reports supporting. Fails if already
    /// initialized.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), OrchestratorError> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::AlreadyInitialized);
        }

        let ids: Vec<AgentId> = self.agents.iter().map(|e| e.key().clone()).collect();
        let init_futures = ids.iter().map(|id| {
            let agent = Arc::clone(&self.agents.get(id).expect("just collected").agent);
            async move { agent.initialize().await }
        });
        let results = futures::future::join_all(init_futures).await;

        for (id, result) in ids.iter().zip(results) {
            if let Err(err) = result {
                warn!(agent_id = %id.as_ref(), error = %err, "agent failed to initialize");
                continue;
            }
            if let Err(err) = self.subscribe_agent(id) {
                warn!(agent_id = %id.as_ref(), error = %err, "agent failed to subscribe");
            }
        }

        self.events.publish(topics::SYSTEM_READY, HashMap::new());
        Ok(())
    }

    /// Deinitialize every agent, unsubscribe them, and return to the
    /// uninitialized state. Fails if not initialized.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        if self
            .initialized
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::NotInitialized);
        }

        let entries: Vec<(AgentId, Arc<dyn Agent>)> = self
            .agents
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.value().agent)))
            .collect();

        let shutdown_futures = entries.iter().map(|(_, agent)| {
            let agent = Arc::clone(agent);
            async move { agent.shutdown().await }
        });
        let _ = futures::future::join_all(shutdown_futures).await;

        for (id, _) in &entries {
            self.bus.unsubscribe(id.as_ref());
        }

        self.events.publish(topics::SYSTEM_SHUTDOWN, HashMap::new());
        Ok(())
    }

    /// Route a single message, stamping a routing timestamp, logging its
    /// pending/delivered/failed status via the debug manager, and dispatching
    /// failures to the error handler.
    #[instrument(skip(self, message), fields(message_id = %message.id.as_ref()))]
    pub async fn send_message(&self, message: Message) -> Result<(), OrchestratorError> {
        let start = SystemTime::now();
        self.debug
            .log_message(&message.workflow_id, message.clone(), DeliveryStatus::Pending, None);

        match self.bus.route(&message).await {
            Ok(()) => {
                let end = SystemTime::now();
                self.debug.log_message(
                    &message.workflow_id,
                    message.clone(),
                    DeliveryStatus::Delivered,
                    None,
                );
                if let Some(target) = &message.target_id {
                    self.performance.record_routing(RoutingRecord {
                        source: message.source_id.clone(),
                        target: target.clone(),
                        start,
                        end,
                    });
                }
                Ok(())
            }
            Err(err) => {
                let error_text = err.to_string();
                self.debug.log_message(
                    &message.workflow_id,
                    message.clone(),
                    DeliveryStatus::Failed,
                    Some(error_text.clone()),
                );
                self.error_handler
                    .handle(
                        &error_text,
                        ErrorContext {
                            workflow_id: Some(message.workflow_id.clone()),
                            task_id: None,
                            agent_id: message.target_id.clone(),
                            operation: "sendMessage".to_string(),
                            data: None,
                        },
                    )
                    .await;
                Err(OrchestratorError::SendFailed {
                    category: classify(&error_text),
                    message: error_text,
                    attempts: 1,
                })
            }
        }
    }

    /// Route a message with retry, sleeping `base_delay`-scaled backoff
    /// between attempts per `policy`.
    #[instrument(skip(self, message, policy), fields(message_id = %message.id.as_ref()))]
    pub async fn send_message_with_retry(
        &self,
        message: Message,
        policy: &RetryPolicy,
        base_delay: Duration,
    ) -> Result<(), OrchestratorError> {
        self.debug
            .log_message(&message.workflow_id, message.clone(), DeliveryStatus::Pending, None);

        let workflow_id = message.workflow_id.clone();
        let target_id = message.target_id.clone();
        let logged_message = message.clone();
        let result = self
            .bus
            .send_with_retry(message, policy, base_delay, classify_bus_error)
            .await;

        if result.success {
            self.debug.log_message(
                &workflow_id,
                logged_message,
                DeliveryStatus::Delivered,
                None,
            );
            return Ok(());
        }

        let error_text = result.last_error.unwrap_or_default();
        self.debug
            .log_message(&workflow_id, logged_message, DeliveryStatus::Failed, Some(error_text.clone()));
        self.error_handler
            .handle(
                &error_text,
                ErrorContext {
                    workflow_id: Some(workflow_id),
                    task_id: None,
                    agent_id: target_id,
                    operation: "sendMessageWithRetry".to_string(),
                    data: None,
                },
            )
            .await;

        Err(OrchestratorError::SendFailed {
            category: classify(&error_text),
            message: error_text,
            attempts: result.attempts,
        })
    }

    /// Broadcast a message to every agent subscribed to its kind.
    pub async fn broadcast(&self, mut message: Message) -> Result<(), OrchestratorError> {
        message.target_id = None;
        self.send_message(message).await
    }

    /// Create a workflow.
    pub fn create_workflow(
        &self,
        id: WorkflowId,
        initiator_id: AgentId,
        initial: Option<WorkflowState>,
    ) -> Result<(), OrchestratorError> {
        Ok(self.workflows.create_workflow(id, initiator_id, initial)?)
    }

    /// Fetch a workflow's current state.
    pub fn get_workflow(&self, id: &WorkflowId) -> Result<WorkflowState, OrchestratorError> {
        Ok(self.workflows.get_workflow(id)?)
    }

    /// Alias for [`Self::get_workflow`], named to match the external
    /// interface's "get workflow state" operation.
    pub fn get_workflow_state(&self, id: &WorkflowId) -> Result<WorkflowState, OrchestratorError> {
        self.get_workflow(id)
    }

    /// Merge a partial update into a workflow.
    pub fn update_workflow(
        &self,
        id: &WorkflowId,
        update: WorkflowUpdate,
    ) -> Result<WorkflowState, OrchestratorError> {
        Ok(self.workflows.update_workflow(id, update)?)
    }

    /// Create a task inside a workflow.
    pub fn create_task(
        &self,
        workflow_id: &WorkflowId,
        task_id: TaskId,
        agent_id: AgentId,
        input: HashMap<String, Value>,
        parent_task_id: Option<TaskId>,
    ) -> Result<Task, OrchestratorError> {
        Ok(self
            .workflows
            .create_task(workflow_id, task_id, agent_id, input, parent_task_id)?)
    }

    /// Fetch a task.
    pub fn get_task(&self, workflow_id: &WorkflowId, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        Ok(self.workflows.get_task(workflow_id, task_id)?)
    }

    /// Merge a partial update into a task.
    pub fn update_task(
        &self,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
        update: TaskUpdate,
    ) -> Result<Task, OrchestratorError> {
        Ok(self.workflows.update_task(workflow_id, task_id, update)?)
    }

    /// Tasks listed in a parent's child list, skipping any dangling ids.
    pub fn get_child_tasks(
        &self,
        workflow_id: &WorkflowId,
        parent_task_id: &TaskId,
    ) -> Result<Vec<Task>, OrchestratorError> {
        Ok(self.workflows.get_child_tasks(workflow_id, parent_task_id)?)
    }

    /// Turn on debug recording.
    pub fn enable_debug(&self) {
        self.debug.enable();
    }

    /// Turn off debug recording.
    pub fn disable_debug(&self) {
        self.debug.disable();
    }

    /// Replay a recorded workflow into a fresh one.
    pub async fn replay_workflow(
        &self,
        workflow_id: &WorkflowId,
        initiator_id: AgentId,
    ) -> Result<ReplayResult, OrchestratorError> {
        Ok(self
            .debug
            .replay(workflow_id, &self.bus, &self.workflows, initiator_id)
            .await?)
    }

    /// A snapshot of aggregated performance data.
    #[must_use]
    pub fn performance_snapshot(&self) -> PerformanceSummary {
        self.performance.summary()
    }

    /// Subscribe a handler to an event-bus topic.
    pub fn subscribe_event(&self, topic: impl Into<String>, handler: EventHandler) {
        self.events.subscribe(topic, handler);
    }

    /// Poll a spec-loader source once, publishing a `spec-changed` event for
    /// every detected change.
    pub async fn poll_spec_loader<S: SpecSource>(
        &self,
        loader: &mut SpecLoader<S>,
    ) -> Result<Vec<SpecChange>, String> {
        let changes = loader.poll().await?;
        for change in &changes {
            let id = match change {
                SpecChange::Added { id, .. }
                | SpecChange::Modified { id, .. }
                | SpecChange::Deleted { id } => id.clone(),
            };
            let mut payload = HashMap::new();
            payload.insert("spec_id".to_string(), Value::from(id));
            self.events.publish(topics::SPEC_CHANGED, payload);
        }
        Ok(changes)
    }

    /// The configuration this orchestrator was built from.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Register that `dependent` should be notified when `source` suffers a
    /// system-category failure.
    pub fn register_dependency(&self, dependent: AgentId, source: AgentId, handler: NotificationHandler) {
        self.error_handler.register_dependency(dependent, source, handler);
    }

    /// Ordered history of messages routed for a workflow.
    #[must_use]
    pub fn message_history(&self, workflow_id: &WorkflowId) -> Vec<Message> {
        self.bus.message_history(workflow_id)
    }

    /// Queue a message on a registered agent's work queue.
    pub fn enqueue_work(&self, agent_id: &AgentId, message: Message) -> Result<(), OrchestratorError> {
        Ok(self.allocator.enqueue(agent_id, message)?)
    }

    /// Pop the next queued message for an agent under priority-then-FIFO order.
    pub fn dequeue_work(&self, agent_id: &AgentId) -> Result<Option<Message>, OrchestratorError> {
        Ok(self.allocator.dequeue(agent_id)?)
    }

    /// Record that an agent finished processing a message, updating its
    /// rolling average and clearing its starved flag.
    pub fn record_processing(&self, agent_id: &AgentId, elapsed: Duration) -> Result<(), OrchestratorError> {
        Ok(self.allocator.record_processing(agent_id, elapsed)?)
    }

    /// Mark and return every registered agent currently starved.
    pub fn detect_starvation(&self) -> Vec<AgentId> {
        self.allocator.detect_starvation()
    }

    /// Choose which of the candidate agents should run next.
    #[must_use]
    pub fn schedule_next_agent(&self, candidate_ids: &[AgentId]) -> ScheduleDecision {
        self.allocator.schedule_next_agent(candidate_ids)
    }
}
