//! Error types for the orchestration core
//!
//! Each subsystem defines its own `thiserror`-derived error enum rather than
//! funneling every failure through one crate-wide type, mirroring how the
//! message bus, workflow manager, allocator, and debug manager are owned by
//! the orchestrator but fail independently.

use crate::domain::ErrorCategory;
use thiserror::Error;

/// Validation failure for a single field of a domain value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl FieldError {
    /// Construct a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while constructing or validating a domain value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// One or more fields failed structural validation.
    #[error("validation failed: {0:?}")]
    Fields(Vec<FieldError>),
}

impl ValidationError {
    /// Build a single-field validation error.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fields(vec![FieldError::new(field, message)])
    }
}

/// Errors raised by the [`crate::message_bus::MessageBus`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Subscribe called with an empty agent id or empty kind set.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Directed route target has no subscription at all.
    #[error("no subscription for agent {0}")]
    NoSubscription(String),

    /// Directed route target is subscribed but not to this message kind.
    #[error("agent {agent} is not subscribed to kind {kind}")]
    KindMismatch {
        /// Target agent id.
        agent: String,
        /// Message kind that had no matching subscription.
        kind: String,
    },

    /// The handler invoked for delivery returned an error.
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    /// A per-attempt timeout elapsed before the handler completed.
    #[error("delivery timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors raised by the [`crate::workflow_state::WorkflowStateManager`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Referenced workflow does not exist.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Referenced task does not exist within its workflow.
    #[error("task not found: {0} in workflow {1}")]
    TaskNotFound(String, String),

    /// Attempted to create a workflow whose id already exists.
    #[error("workflow already exists: {0}")]
    AlreadyExists(String),

    /// A value failed structural validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors raised by the [`crate::resource_allocator::ResourceAllocator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// Enqueue/dequeue/record targeted an agent with no registered queue.
    #[error("agent not registered: {0}")]
    AgentNotRegistered(String),

    /// Attempted to register an agent id that is already registered.
    #[error("agent already registered: {0}")]
    AlreadyRegistered(String),
}

/// Errors raised by the [`crate::debug_manager::DebugManager`] during replay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebugError {
    /// No recorded data exists for the requested workflow.
    #[error("no debug data for workflow {0}")]
    NoRecordedData(String),

    /// The bus, state manager, or registry needed for replay was unavailable.
    #[error("replay dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

/// Errors raised by [`crate::orchestrator::Orchestrator`].
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    /// `initialize` was called on an already-initialized orchestrator.
    #[error("orchestrator already initialized")]
    AlreadyInitialized,

    /// An operation was attempted before `initialize` completed.
    #[error("orchestrator not initialized")]
    NotInitialized,

    /// Attempted to register an agent id that is already registered.
    #[error("agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    /// Referenced agent is not registered with the orchestrator.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// An agent's `initialize`/`shutdown` hook returned an error.
    #[error("agent lifecycle hook failed: {0}")]
    AgentInitFailed(String),

    /// Delivery through the message bus failed.
    #[error("send failed (category {category:?}, attempts {attempts}): {message}")]
    SendFailed {
        /// Classification assigned by the error handler.
        category: ErrorCategory,
        /// Stable, caller-facing error description.
        message: String,
        /// Number of delivery attempts made, when retry was used.
        attempts: u32,
    },

    /// The message bus rejected the operation outright.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The workflow state manager rejected the operation.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The resource allocator rejected the operation.
    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    /// The debug manager rejected the operation.
    #[error(transparent)]
    Debug(#[from] DebugError),

    /// A submitted value failed structural validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
