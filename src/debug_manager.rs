//! Debug manager: message/state snapshotting and replay.
//!
//! Recording is opt-in per stream (messages, workflow-state, agent-state),
//! each toggled independently via [`DebugManagerConfig`].

use crate::domain::{AgentId, AgentStateRecord, Message, MessageId, WorkflowId, WorkflowState};
use crate::error::DebugError;
use crate::message_bus::MessageBus;
use crate::workflow_state::WorkflowStateManager;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{instrument, warn};

/// Delivery outcome recorded for a logged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Routing was attempted but has not yet concluded.
    Pending,
    /// Routing succeeded.
    Delivered,
    /// Routing failed.
    Failed,
}

/// One entry in the message log.
#[derive(Debug, Clone)]
pub struct MessageLogEntry {
    /// The message as routed.
    pub message: Message,
    /// Its delivery outcome.
    pub status: DeliveryStatus,
    /// Error text, when `status` is `Failed`.
    pub error: Option<String>,
    /// Time the entry was recorded.
    pub recorded_at: SystemTime,
}

/// Which sub-streams the debug manager records.
#[derive(Debug, Clone, Copy)]
pub struct DebugManagerConfig {
    /// Master switch; when false no stream records anything.
    pub enabled: bool,
    /// Record message log entries.
    pub log_messages: bool,
    /// Record routing/latency information alongside messages.
    pub log_routing: bool,
    /// Record agent-state snapshots.
    pub log_agent_state: bool,
    /// Record workflow-state snapshots.
    pub log_workflow_state: bool,
}

impl Default for DebugManagerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_messages: true,
            log_routing: true,
            log_agent_state: true,
            log_workflow_state: true,
        }
    }
}

/// The outcome of replaying a recorded workflow.
#[derive(Debug, Clone)]
pub struct ReplayResult {
    /// Whether every replayed message was delivered without error.
    pub success: bool,
    /// How many messages were replayed.
    pub replayed_count: usize,
    /// Per-message failures encountered during replay.
    pub errors: Vec<(String, String)>,
    /// The resulting replay workflow's final state, if obtainable.
    pub final_state: Option<WorkflowState>,
}

/// Records message/state streams and replays them into fresh workflows.
pub struct DebugManager {
    enabled: AtomicBool,
    config: DebugManagerConfig,
    messages: DashMap<WorkflowId, Mutex<Vec<MessageLogEntry>>>,
    workflow_snapshots: DashMap<WorkflowId, Mutex<Vec<WorkflowState>>>,
    agent_snapshots: DashMap<WorkflowId, Mutex<Vec<AgentStateRecord>>>,
}

impl DebugManager {
    /// Construct a debug manager with the given stream toggles.
    #[must_use]
    pub fn new(config: DebugManagerConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            messages: DashMap::new(),
            workflow_snapshots: DashMap::new(),
            agent_snapshots: DashMap::new(),
        }
    }

    /// Turn recording on for every stream enabled in the config.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Turn recording off entirely, without discarding already-recorded data.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Whether recording is currently on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Record a message's delivery status, if `log_messages` is enabled.
    pub fn log_message(
        &self,
        workflow_id: &WorkflowId,
        message: Message,
        status: DeliveryStatus,
        error: Option<String>,
    ) {
        if !self.is_enabled() || !self.config.log_messages {
            return;
        }
        self.messages
            .entry(workflow_id.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MessageLogEntry {
                message,
                status,
                error,
                recorded_at: SystemTime::now(),
            });
    }

    /// Record a deep copy of a workflow's state, if `log_workflow_state` is
    /// enabled.
    pub fn snapshot_workflow(&self, state: &WorkflowState) {
        if !self.is_enabled() || !self.config.log_workflow_state {
            return;
        }
        self.workflow_snapshots
            .entry(state.id.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(state.clone());
    }

    /// Record an agent-state snapshot under a workflow id, if
    /// `log_agent_state` is enabled.
    pub fn snapshot_agent_state(&self, workflow_id: &WorkflowId, state: &AgentStateRecord) {
        if !self.is_enabled() || !self.config.log_agent_state {
            return;
        }
        self.agent_snapshots
            .entry(workflow_id.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(state.clone());
    }

    /// Messages recorded for a workflow, in recorded order.
    #[must_use]
    pub fn messages_for(&self, workflow_id: &WorkflowId) -> Vec<MessageLogEntry> {
        self.messages
            .get(workflow_id)
            .map(|e| e.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }

    /// Replay a recorded workflow: re-route its logged messages into a fresh
    /// workflow, preserving order and isolating per-message failures.
    #[instrument(skip(self, bus, state_manager))]
    pub async fn replay(
        &self,
        workflow_id: &WorkflowId,
        bus: &MessageBus,
        state_manager: &WorkflowStateManager,
        initiator_id: AgentId,
    ) -> Result<ReplayResult, DebugError> {
        let entries = self.messages_for(workflow_id);
        if entries.is_empty() {
            return Err(DebugError::NoRecordedData(workflow_id.clone().into_inner()));
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let replay_id = format!("{}-replay-{timestamp}", workflow_id.as_ref());
        let replay_workflow_id =
            WorkflowId::try_new(replay_id).map_err(|e| DebugError::DependencyUnavailable(e.to_string()))?;

        let seed = self
            .workflow_snapshots
            .get(workflow_id)
            .and_then(|snaps| snaps.lock().unwrap_or_else(|e| e.into_inner()).first().cloned());

        state_manager
            .create_workflow(replay_workflow_id.clone(), initiator_id, None)
            .map_err(|e| DebugError::DependencyUnavailable(e.to_string()))?;
        if let Some(seed) = seed {
            let _ = state_manager.update_workflow(
                &replay_workflow_id,
                crate::workflow_state::WorkflowUpdate {
                    status: Some(seed.status),
                    shared_data: seed.shared_data,
                },
            );
        }

        let mut replayed_count = 0;
        let mut errors = Vec::new();

        for entry in entries {
            let mut replayed = entry.message.clone();
            replayed.workflow_id = replay_workflow_id.clone();
            replayed.id = MessageId::try_new(format!("{}-replay", entry.message.id.as_ref()))
                .unwrap_or_else(|_| entry.message.id.clone());
            replayed.metadata.created_at = SystemTime::now();
            replayed.metadata.retry_count = 0;

            match bus.route(&replayed).await {
                Ok(()) => replayed_count += 1,
                Err(err) => {
                    warn!(message_id = %replayed.id.as_ref(), error = %err, "replay delivery failed");
                    errors.push((replayed.id.into_inner(), err.to_string()));
                }
            }
        }

        let final_state = state_manager.get_workflow(&replay_workflow_id).ok();

        Ok(ReplayResult {
            success: errors.is_empty(),
            replayed_count,
            errors,
            final_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageKind;
    use std::collections::HashMap;

    fn msg(id: &str, workflow: &str) -> Message {
        Message::new(
            MessageId::try_new(id).unwrap(),
            MessageKind::TaskRequest,
            WorkflowId::try_new(workflow).unwrap(),
            AgentId::try_new("S").unwrap(),
            Some(AgentId::try_new("A").unwrap()),
            HashMap::new(),
        )
    }

    #[test]
    fn logging_respects_disabled_config() {
        let manager = DebugManager::new(DebugManagerConfig {
            enabled: false,
            ..Default::default()
        });
        manager.log_message(
            &WorkflowId::try_new("w1").unwrap(),
            msg("m1", "w1"),
            DeliveryStatus::Delivered,
            None,
        );
        assert!(manager
            .messages_for(&WorkflowId::try_new("w1").unwrap())
            .is_empty());
    }

    #[tokio::test]
    async fn replay_without_recorded_data_fails() {
        let manager = DebugManager::new(DebugManagerConfig {
            enabled: true,
            ..Default::default()
        });
        let bus = MessageBus::new();
        let state_manager = WorkflowStateManager::new();
        let err = manager
            .replay(
                &WorkflowId::try_new("w-none").unwrap(),
                &bus,
                &state_manager,
                AgentId::try_new("caller").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::NoRecordedData(_)));
    }

    #[tokio::test]
    async fn replay_rewrites_ids_and_preserves_count() {
        let manager = DebugManager::new(DebugManagerConfig {
            enabled: true,
            ..Default::default()
        });
        let bus = MessageBus::new();
        let state_manager = WorkflowStateManager::new();

        for i in 0..5 {
            manager.log_message(
                &WorkflowId::try_new("w3").unwrap(),
                msg(&format!("m{i}"), "w3"),
                DeliveryStatus::Pending,
                None,
            );
        }

        let result = manager
            .replay(
                &WorkflowId::try_new("w3").unwrap(),
                &bus,
                &state_manager,
                AgentId::try_new("caller").unwrap(),
            )
            .await
            .unwrap();

        // No subscribers: every replayed broadcast-less directed route fails
        // because target "A" has no subscription, but replay still attempts
        // all 5 and records the failures rather than aborting.
        assert_eq!(result.replayed_count + result.errors.len(), 5);
        assert!(result.final_state.is_some());
    }
}
