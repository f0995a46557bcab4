//! # Conclave - Multi-Agent Orchestration Core
//!
//! Conclave is a runtime library for coordinating a fleet of independently
//! implemented agents: message routing with retry, workflow/task state
//! tracking, fair resource scheduling across agents, centralized error
//! classification and escalation, optional debug recording and replay, and
//! in-process performance aggregation.
//!
//! ## Core Components
//!
//! - **Message Bus**: subscription-based routing with policy-driven retry
//! - **Workflow State Manager**: task trees and shared workflow data
//! - **Resource Allocator**: per-agent queues with starvation-aware scheduling
//! - **Error Handler**: classification, logging, and dependent notification
//! - **Debug Manager**: opt-in message/state recording and deterministic replay
//! - **Performance Monitor**: bounded-history timing aggregation
//! - **Orchestrator**: wires the above around a registry of [`Agent`] values
//!
//! ## Architecture
//!
//! ```no_run
//! use conclave::{CoreConfig, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(CoreConfig::development());
//!     orchestrator.initialize().await?;
//!     orchestrator.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod debug_manager;
pub mod domain;
pub mod error;
pub mod error_handler;
pub mod event_bus;
pub mod message_bus;
pub mod orchestrator;
pub mod performance_monitor;
pub mod resource_allocator;
pub mod spec_loader;
pub mod workflow_state;

pub use crate::agent::{Agent, AgentStateUpdate, HandleOutcome, HealthStatus};
pub use crate::config::{CoreConfig, CoreConfigBuilder};
pub use crate::domain::{
    AgentId, AgentSpec, AgentStatus, BackoffStrategy, ErrorCategory, Message, MessageId,
    MessageKind, Priority, RetryPolicy, Task, TaskId, TaskStatus, WorkflowId, WorkflowState,
    WorkflowStatus,
};
pub use crate::error::{
    AllocatorError, BusError, DebugError, OrchestratorError, ValidationError, WorkflowError,
};
pub use crate::orchestrator::Orchestrator;
