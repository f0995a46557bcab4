//! Core domain types shared across the orchestration subsystems.
//!
//! Primitive-obsession-prone values are newtyped with `nutype` and validated
//! at construction rather than passing raw `String`/`u64` around.

use crate::error::{FieldError, ValidationError};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Identity of a message routed through the bus.
#[nutype(
    sanitize(trim),
    validate(not_empty),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef)
)]
pub struct MessageId(String);

/// Identity of a workflow.
#[nutype(
    sanitize(trim),
    validate(not_empty),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef)
)]
pub struct WorkflowId(String);

/// Identity of an agent, stable for the agent's lifetime.
#[nutype(
    sanitize(trim),
    validate(not_empty),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef)
)]
pub struct AgentId(String);

/// Identity of a task within a workflow.
#[nutype(
    sanitize(trim),
    validate(not_empty),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef)
)]
pub struct TaskId(String);

/// Maximum retry attempts for a retry policy, beyond the initial attempt.
#[nutype(
    validate(less_or_equal = 20),
    default = 3,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct MaxRetries(u32);

/// Per-attempt timeout, in milliseconds, for a retry policy.
#[nutype(
    validate(greater_or_equal = 1),
    default = 5000,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct TimeoutMs(u64);

/// Base delay, in milliseconds, between retry attempts.
#[nutype(
    validate(greater_or_equal = 1),
    default = 1000,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct BaseDelayMs(u64);

impl TimeoutMs {
    /// Convert to a `std::time::Duration`.
    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

impl BaseDelayMs {
    /// Convert to a `std::time::Duration`.
    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Kind of a message, enumerated per the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A request that a task be performed.
    TaskRequest,
    /// A response to a prior task request.
    TaskResponse,
    /// Delegation of a task to another agent.
    TaskDelegation,
    /// An update to shared or workflow state.
    StateUpdate,
    /// An error report.
    Error,
    /// A liveness/health probe.
    HealthCheck,
}

/// Delivery priority carried in message metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest delivery priority.
    Low,
    /// Default delivery priority.
    Normal,
    /// Elevated delivery priority.
    High,
    /// Highest delivery priority; scheduled ahead of all others.
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Metadata carried by every message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Wall-clock creation time.
    pub created_at: SystemTime,
    /// Delivery priority.
    pub priority: Priority,
    /// Number of retry attempts recorded so far.
    pub retry_count: u32,
    /// Id of the message this one is a retry/response to, if any.
    pub parent_message_id: Option<MessageId>,
}

impl MessageMetadata {
    /// Build fresh metadata stamped with the current time.
    #[must_use]
    pub fn new(priority: Priority) -> Self {
        Self {
            created_at: SystemTime::now(),
            priority,
            retry_count: 0,
            parent_message_id: None,
        }
    }
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self::new(Priority::default())
    }
}

/// A typed, addressed record routed via the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// Message kind.
    pub kind: MessageKind,
    /// Workflow this message belongs to.
    pub workflow_id: WorkflowId,
    /// Agent that sent the message.
    pub source_id: AgentId,
    /// Agent the message is addressed to; absent for broadcast.
    pub target_id: Option<AgentId>,
    /// Opaque structured payload.
    pub payload: HashMap<String, serde_json::Value>,
    /// Delivery and retry metadata.
    pub metadata: MessageMetadata,
}

impl Message {
    /// Construct a message, validating non-empty identity fields.
    pub fn new(
        id: MessageId,
        kind: MessageKind,
        workflow_id: WorkflowId,
        source_id: AgentId,
        target_id: Option<AgentId>,
        payload: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id,
            kind,
            workflow_id,
            source_id,
            target_id,
            payload,
            metadata: MessageMetadata::default(),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet started.
    Pending,
    /// Currently being worked on.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with a failure that will not be retried.
    Failed,
    /// Finished with a failure that is being retried.
    Retrying,
}

/// A unit of work owned by an agent inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: TaskId,
    /// Agent responsible for the task.
    pub agent_id: AgentId,
    /// Current status.
    pub status: TaskStatus,
    /// Input payload.
    pub input: HashMap<String, serde_json::Value>,
    /// Output payload, once available.
    pub output: Option<HashMap<String, serde_json::Value>>,
    /// Error description, if the task failed.
    pub error: Option<String>,
    /// Number of retry attempts recorded.
    pub retry_count: u32,
    /// Parent task, if this task was spawned by another.
    pub parent_task_id: Option<TaskId>,
    /// Ids of tasks spawned by this one.
    pub child_task_ids: Vec<TaskId>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Completion timestamp, once terminal.
    pub completed_at: Option<SystemTime>,
}

impl Task {
    /// Construct a new pending task.
    #[must_use]
    pub fn new(
        id: TaskId,
        agent_id: AgentId,
        input: HashMap<String, serde_json::Value>,
        parent_task_id: Option<TaskId>,
    ) -> Self {
        Self {
            id,
            agent_id,
            status: TaskStatus::Pending,
            input,
            output: None,
            error: None,
            retry_count: 0,
            parent_task_id,
            child_task_ids: Vec::new(),
            created_at: SystemTime::now(),
            completed_at: None,
        }
    }
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, no mutation yet observed.
    Pending,
    /// At least one mutation has been observed.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an unrecoverable failure.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

/// Metadata carried by every workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Timestamp of the most recent mutation.
    pub updated_at: SystemTime,
    /// Agent or caller that created the workflow.
    pub initiator_id: AgentId,
}

/// A logical unit of work: a task tree plus shared scratch data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique workflow id.
    pub id: WorkflowId,
    /// Current status.
    pub status: WorkflowStatus,
    /// Tasks belonging to this workflow, keyed by task id.
    pub tasks: HashMap<TaskId, Task>,
    /// Cross-agent scratch space.
    pub shared_data: HashMap<String, serde_json::Value>,
    /// Creation/update/initiator metadata.
    pub metadata: WorkflowMetadata,
}

impl WorkflowState {
    /// Construct a new, empty pending workflow.
    #[must_use]
    pub fn new(id: WorkflowId, initiator_id: AgentId) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            status: WorkflowStatus::Pending,
            tasks: HashMap::new(),
            shared_data: HashMap::new(),
            metadata: WorkflowMetadata {
                created_at: now,
                updated_at: now,
                initiator_id,
            },
        }
    }
}

/// Lifecycle status of an agent as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered but not yet initialized.
    Initializing,
    /// Initialized and able to accept work.
    Ready,
    /// Currently processing a message.
    Busy,
    /// A system-category failure occurred; requires intervention.
    Error,
    /// Deinitialized; no longer accepting work.
    Shutdown,
}

/// Point-in-time record of an agent's operational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateRecord {
    /// Agent this record describes.
    pub agent_id: AgentId,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Tasks currently assigned and unfinished.
    pub in_flight_task_ids: Vec<TaskId>,
    /// Count of tasks completed successfully.
    pub completed_count: u64,
    /// Count of tasks that ended in failure.
    pub failed_count: u64,
    /// Rolling average processing time, in milliseconds.
    pub average_processing_ms: f64,
    /// Timestamp of the most recent health check.
    pub last_health_check: Option<SystemTime>,
    /// Free-form configuration.
    pub configuration: HashMap<String, serde_json::Value>,
}

impl AgentStateRecord {
    /// Construct a fresh record for a newly registered agent.
    #[must_use]
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            status: AgentStatus::Initializing,
            in_flight_task_ids: Vec::new(),
            completed_count: 0,
            failed_count: 0,
            average_processing_ms: 0.0,
            last_health_check: None,
            configuration: HashMap::new(),
        }
    }
}

/// Backoff shape used between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always wait the same base delay.
    Fixed,
    /// Wait `base * attempt`.
    Linear,
    /// Wait `base * 2^(attempt - 1)`.
    Exponential,
}

/// Classification assigned to a handled error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Failed input validation; never retried.
    Validation,
    /// Critical/infrastructure failure; escalated, never retried.
    System,
    /// Domain-logic failure; retried with a short linear backoff.
    BusinessLogic,
    /// Network/timeout/unknown failure; retried with exponential backoff.
    Transient,
}

impl BackoffStrategy {
    /// Compute the delay before the given 1-based attempt number.
    #[must_use]
    pub fn delay(self, attempt_number: u32, base: std::time::Duration) -> std::time::Duration {
        match self {
            Self::Fixed => base,
            Self::Linear => base * attempt_number,
            Self::Exponential => base * 2u32.saturating_pow(attempt_number.saturating_sub(1)),
        }
    }
}

/// Governs how a failed delivery is retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries beyond the initial attempt.
    pub max_retries: MaxRetries,
    /// Backoff shape between attempts.
    pub backoff: BackoffStrategy,
    /// Error categories eligible for retry.
    pub retryable: Vec<ErrorCategory>,
    /// Per-attempt timeout.
    pub timeout: TimeoutMs,
}

impl RetryPolicy {
    /// The default policy named in the external-interfaces contract:
    /// 3 retries, exponential backoff, transient errors only, 5s timeout.
    #[must_use]
    pub fn default_policy() -> Self {
        Self {
            max_retries: MaxRetries::try_new(3).unwrap_or_default(),
            backoff: BackoffStrategy::Exponential,
            retryable: vec![ErrorCategory::Transient],
            timeout: TimeoutMs::try_new(5000).unwrap_or_default(),
        }
    }

    /// Whether a category of failure may be retried under this policy.
    #[must_use]
    pub fn allows_retry(&self, category: ErrorCategory) -> bool {
        self.retryable.contains(&category)
    }
}

/// A structured record describing an agent, consumed by the spec loader and
/// used to materialize an agent registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Stable agent id.
    pub id: AgentId,
    /// Human-readable name.
    pub name: String,
    /// Declared capabilities.
    pub capabilities: Vec<String>,
    /// Message kinds the agent recognizes.
    pub message_types: Vec<MessageKind>,
    /// Optional free-form configuration.
    pub configuration: Option<HashMap<String, serde_json::Value>>,
}

impl AgentSpec {
    /// Validate structural invariants: non-empty name, capability list, and
    /// message-type list.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        }
        if self.capabilities.is_empty() {
            errors.push(FieldError::new("capabilities", "must not be empty"));
        }
        if self.message_types.is_empty() {
            errors.push(FieldError::new("message_types", "must not be empty"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Fields(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_rejects_empty() {
        assert!(MessageId::try_new("").is_err());
        assert!(MessageId::try_new("  ").is_err());
        assert!(MessageId::try_new("m1").is_ok());
    }

    #[test]
    fn max_retries_defaults_to_three() {
        assert_eq!(MaxRetries::default().into_inner(), 3);
    }

    #[test]
    fn backoff_delay_shapes() {
        let base = std::time::Duration::from_millis(10);
        assert_eq!(BackoffStrategy::Fixed.delay(1, base), base);
        assert_eq!(BackoffStrategy::Fixed.delay(3, base), base);
        assert_eq!(BackoffStrategy::Linear.delay(3, base), base * 3);
        assert_eq!(BackoffStrategy::Exponential.delay(1, base), base);
        assert_eq!(BackoffStrategy::Exponential.delay(3, base), base * 4);
    }

    #[test]
    fn agent_spec_validation_catches_empty_fields() {
        let spec = AgentSpec {
            id: AgentId::try_new("a1").unwrap(),
            name: String::new(),
            capabilities: vec![],
            message_types: vec![],
            configuration: None,
        };
        let err = spec.validate().unwrap_err();
        match err {
            ValidationError::Fields(fields) => assert_eq!(fields.len(), 3),
        }
    }

    #[test]
    fn workflow_state_starts_pending_with_empty_tasks() {
        let w = WorkflowState::new(
            WorkflowId::try_new("w1").unwrap(),
            AgentId::try_new("caller").unwrap(),
        );
        assert_eq!(w.status, WorkflowStatus::Pending);
        assert!(w.tasks.is_empty());
    }
}
