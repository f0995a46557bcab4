//! Workflow state manager: parent/child task graphs and mutation invariants.
//!
//! The orchestrator exclusively owns one instance of this manager; external
//! callers reach it only through the orchestrator's public surface. Internal
//! storage uses a `DashMap` rather than a mutex-guarded `HashMap`.

use crate::domain::{Task, TaskId, TaskStatus, WorkflowId, WorkflowState, WorkflowStatus};
use crate::error::WorkflowError;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, instrument};

/// Partial update applied to a workflow by [`WorkflowStateManager::update_workflow`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    /// New status, if changing.
    pub status: Option<WorkflowStatus>,
    /// Shared-data keys to merge in; existing keys not named here are kept.
    pub shared_data: HashMap<String, Value>,
}

/// Partial update applied to a task by [`WorkflowStateManager::update_task`].
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New status, if changing.
    pub status: Option<TaskStatus>,
    /// New output, if changing.
    pub output: Option<HashMap<String, Value>>,
    /// New error description, if changing.
    pub error: Option<String>,
    /// New retry count, if changing.
    pub retry_count: Option<u32>,
    /// New completion timestamp, if changing.
    pub completed_at: Option<SystemTime>,
}

/// Owns every [`WorkflowState`] and the tasks inside it.
pub struct WorkflowStateManager {
    workflows: DashMap<WorkflowId, WorkflowState>,
}

impl Default for WorkflowStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStateManager {
    /// Construct an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
        }
    }

    /// Create a workflow, failing if the id is already present.
    #[instrument(skip(self, initial))]
    pub fn create_workflow(
        &self,
        id: WorkflowId,
        initiator_id: crate::domain::AgentId,
        initial: Option<WorkflowState>,
    ) -> Result<(), WorkflowError> {
        if self.workflows.contains_key(&id) {
            return Err(WorkflowError::AlreadyExists(id.into_inner()));
        }
        let state = initial.unwrap_or_else(|| WorkflowState::new(id.clone(), initiator_id));
        self.workflows.insert(id, state);
        Ok(())
    }

    /// Fetch a copy of a workflow's current state.
    pub fn get_workflow(&self, id: &WorkflowId) -> Result<WorkflowState, WorkflowError> {
        self.workflows
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.clone().into_inner()))
    }

    /// Merge a partial update into a workflow: status overwrites, shared-data
    /// keys merge shallowly (named keys override, others are preserved).
    #[instrument(skip(self, update))]
    pub fn update_workflow(
        &self,
        id: &WorkflowId,
        update: WorkflowUpdate,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut entry = self
            .workflows
            .get_mut(id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.clone().into_inner()))?;

        if let Some(status) = update.status {
            entry.status = status;
        }
        for (key, value) in update.shared_data {
            entry.shared_data.insert(key, value);
        }
        entry.metadata.updated_at = SystemTime::now();
        Ok(entry.clone())
    }

    /// Remove a workflow and every task it owns.
    pub fn delete_workflow(&self, id: &WorkflowId) {
        self.workflows.remove(id);
        debug!(workflow_id = %id.as_ref(), "workflow deleted");
    }

    /// Create a task inside a workflow, linking it to its parent's child list
    /// when the parent exists in the same workflow.
    #[instrument(skip(self, input))]
    pub fn create_task(
        &self,
        workflow_id: &WorkflowId,
        task_id: TaskId,
        agent_id: crate::domain::AgentId,
        input: HashMap<String, Value>,
        parent_task_id: Option<TaskId>,
    ) -> Result<Task, WorkflowError> {
        let mut workflow = self
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.clone().into_inner()))?;

        let task = Task::new(task_id.clone(), agent_id, input, parent_task_id.clone());

        if let Some(parent_id) = &parent_task_id {
            if let Some(parent) = workflow.tasks.get_mut(parent_id) {
                parent.child_task_ids.push(task_id.clone());
            }
            // An absent parent is tolerated: the task keeps the reference,
            // no bidirectional link is formed, no error is raised.
        }

        workflow.tasks.insert(task_id, task.clone());
        workflow.metadata.updated_at = SystemTime::now();
        Ok(task)
    }

    /// Fetch a single task from a workflow.
    pub fn get_task(&self, workflow_id: &WorkflowId, task_id: &TaskId) -> Result<Task, WorkflowError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.clone().into_inner()))?;
        workflow
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| WorkflowError::TaskNotFound(task_id.clone().into_inner(), workflow_id.clone().into_inner()))
    }

    /// Merge a partial update into a task.
    #[instrument(skip(self, update))]
    pub fn update_task(
        &self,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
        update: TaskUpdate,
    ) -> Result<Task, WorkflowError> {
        let mut workflow = self
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.clone().into_inner()))?;

        let task = workflow.tasks.get_mut(task_id).ok_or_else(|| {
            WorkflowError::TaskNotFound(task_id.clone().into_inner(), workflow_id.clone().into_inner())
        })?;

        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(output) = update.output {
            task.output = Some(output);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }
        if let Some(retry_count) = update.retry_count {
            task.retry_count = retry_count;
        }
        if let Some(completed_at) = update.completed_at {
            task.completed_at = Some(completed_at);
        }
        let result = task.clone();
        workflow.metadata.updated_at = SystemTime::now();
        Ok(result)
    }

    /// Tasks listed in a parent's child list, skipping any dangling ids.
    pub fn get_child_tasks(
        &self,
        workflow_id: &WorkflowId,
        parent_task_id: &TaskId,
    ) -> Result<Vec<Task>, WorkflowError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.clone().into_inner()))?;
        let parent = workflow.tasks.get(parent_task_id).ok_or_else(|| {
            WorkflowError::TaskNotFound(
                parent_task_id.clone().into_inner(),
                workflow_id.clone().into_inner(),
            )
        })?;
        Ok(parent
            .child_task_ids
            .iter()
            .filter_map(|id| workflow.tasks.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentId;

    fn wid(s: &str) -> WorkflowId {
        WorkflowId::try_new(s).unwrap()
    }
    fn tid(s: &str) -> TaskId {
        TaskId::try_new(s).unwrap()
    }
    fn aid(s: &str) -> AgentId {
        AgentId::try_new(s).unwrap()
    }

    #[test]
    fn create_workflow_rejects_duplicate_id() {
        let mgr = WorkflowStateManager::new();
        mgr.create_workflow(wid("w1"), aid("caller"), None).unwrap();
        let err = mgr
            .create_workflow(wid("w1"), aid("caller"), None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyExists(_)));
    }

    #[test]
    fn parent_child_tree_links_bidirectionally() {
        let mgr = WorkflowStateManager::new();
        mgr.create_workflow(wid("w2"), aid("caller"), None).unwrap();
        mgr.create_task(&wid("w2"), tid("P"), aid("A"), HashMap::new(), None)
            .unwrap();
        mgr.create_task(
            &wid("w2"),
            tid("C1"),
            aid("A"),
            HashMap::new(),
            Some(tid("P")),
        )
        .unwrap();
        mgr.create_task(
            &wid("w2"),
            tid("C2"),
            aid("A"),
            HashMap::new(),
            Some(tid("P")),
        )
        .unwrap();

        let parent = mgr.get_task(&wid("w2"), &tid("P")).unwrap();
        assert_eq!(parent.child_task_ids, vec![tid("C1"), tid("C2")]);

        let children = mgr.get_child_tasks(&wid("w2"), &tid("P")).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, tid("C1"));
        assert_eq!(children[1].id, tid("C2"));
    }

    #[test]
    fn orphan_parent_is_tolerated() {
        let mgr = WorkflowStateManager::new();
        mgr.create_workflow(wid("w3"), aid("caller"), None).unwrap();
        let task = mgr
            .create_task(
                &wid("w3"),
                tid("C"),
                aid("A"),
                HashMap::new(),
                Some(tid("missing-parent")),
            )
            .unwrap();
        assert_eq!(task.parent_task_id, Some(tid("missing-parent")));
    }

    #[test]
    fn update_workflow_merges_shared_data_and_bumps_updated_at() {
        let mgr = WorkflowStateManager::new();
        mgr.create_workflow(wid("w4"), aid("caller"), None).unwrap();
        let before = mgr.get_workflow(&wid("w4")).unwrap();

        let mut shared = HashMap::new();
        shared.insert("a".to_string(), Value::from(1));
        mgr.update_workflow(
            &wid("w4"),
            WorkflowUpdate {
                status: None,
                shared_data: shared,
            },
        )
        .unwrap();

        let mut more = HashMap::new();
        more.insert("b".to_string(), Value::from(2));
        let after = mgr
            .update_workflow(
                &wid("w4"),
                WorkflowUpdate {
                    status: Some(WorkflowStatus::InProgress),
                    shared_data: more,
                },
            )
            .unwrap();

        assert_eq!(after.shared_data.get("a"), Some(&Value::from(1)));
        assert_eq!(after.shared_data.get("b"), Some(&Value::from(2)));
        assert_eq!(after.status, WorkflowStatus::InProgress);
        assert!(after.metadata.updated_at >= before.metadata.updated_at);
    }
}
