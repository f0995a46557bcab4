//! Agent contract consumed by the orchestration core.
//!
//! Every agent the orchestrator drives implements [`Agent`]: a stable id,
//! capability/config metadata, async lifecycle hooks, message handling, and
//! a health check. No WASM-specific load/unload states appear here: agents
//! are already-constructed Rust values, not compiled modules requiring a
//! separate load step.

use crate::domain::{AgentId, AgentStateRecord, Message, MessageKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::SystemTime;

/// Outcome of handling a single message.
#[derive(Debug, Clone)]
pub struct HandleOutcome {
    /// Whether the handler succeeded.
    pub success: bool,
    /// Return payload, when successful.
    pub data: Option<HashMap<String, Value>>,
    /// Error description, when not.
    pub error: Option<String>,
}

impl HandleOutcome {
    /// Build a success outcome.
    #[must_use]
    pub fn ok(data: Option<HashMap<String, Value>>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// Build a failure outcome.
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Result of an agent's health check.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the agent is currently healthy.
    pub healthy: bool,
    /// Time the check was performed.
    pub timestamp: SystemTime,
    /// Optional free-form diagnostic details.
    pub details: Option<HashMap<String, Value>>,
}

/// The contract every orchestrated agent implements.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identity.
    fn id(&self) -> &AgentId;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Declared capabilities.
    fn capabilities(&self) -> &[String];

    /// Free-form configuration.
    fn configuration(&self) -> &HashMap<String, Value>;

    /// Perform async startup work. Invoked once during orchestrator
    /// initialization, or immediately upon registration if the orchestrator
    /// is already initialized.
    async fn initialize(&self) -> Result<(), String>;

    /// Perform async teardown work.
    async fn shutdown(&self) -> Result<(), String>;

    /// Handle a delivered message.
    async fn handle_message(&self, message: Message) -> HandleOutcome;

    /// Whether this agent accepts messages of the given kind.
    fn can_handle(&self, kind: MessageKind) -> bool;

    /// Snapshot of the agent's current operational state.
    fn get_state(&self) -> AgentStateRecord;

    /// Apply a partial update to the agent's operational state. The
    /// orchestrator uses this only to write `status` during error
    /// escalation.
    fn set_state(&self, update: AgentStateUpdate);

    /// Perform a liveness check.
    async fn health_check(&self) -> HealthStatus;
}

/// Partial update applied to an agent's state via [`Agent::set_state`].
#[derive(Debug, Clone, Default)]
pub struct AgentStateUpdate {
    /// New status, if changing.
    pub status: Option<crate::domain::AgentStatus>,
}

/// Enumerates every recognized [`MessageKind`] — used by the orchestrator to
/// discover which kinds a freshly registered agent accepts.
#[must_use]
pub fn all_message_kinds() -> Vec<MessageKind> {
    vec![
        MessageKind::TaskRequest,
        MessageKind::TaskResponse,
        MessageKind::TaskDelegation,
        MessageKind::StateUpdate,
        MessageKind::Error,
        MessageKind::HealthCheck,
    ]
}
