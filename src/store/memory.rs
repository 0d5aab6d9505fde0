//! In-memory reference implementation of the store contract.
//!
//! Documents live in concurrent maps; compare-and-update atomicity comes from
//! the per-key exclusive access of the map's entry API. Revisions start at 0
//! on insert and bump by one on every applied update, matching the contract
//! production document stores provide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{CasOutcome, ExecutionStore};
use crate::error::{ConductorError, Result};
use crate::model::{ActionExecution, ActionRef, ExecutionQueueEntry, LiveAction, Policy};
use crate::workflow::{TaskExecution, WorkflowExecution};

/// DashMap-backed store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    liveactions: DashMap<Uuid, LiveAction>,
    queue_entries: DashMap<Uuid, ExecutionQueueEntry>,
    executions: DashMap<Uuid, ActionExecution>,
    workflows: DashMap<Uuid, WorkflowExecution>,
    tasks: DashMap<Uuid, TaskExecution>,
    policies: RwLock<Vec<Policy>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live queue entries, for test assertions.
    pub fn queue_len(&self) -> usize {
        self.queue_entries.len()
    }
}

// Shared CAS shape for every document map: the update applies only when the
// stored revision matches the caller's read revision.
fn compare_and_update<T>(
    map: &DashMap<Uuid, T>,
    id: Uuid,
    mut incoming: T,
    get_revision: impl Fn(&T) -> u64,
    set_revision: impl Fn(&mut T, u64),
) -> CasOutcome<T>
where
    T: Clone,
{
    match map.get_mut(&id) {
        Some(mut stored) => {
            let current = get_revision(&stored);
            if current != get_revision(&incoming) {
                return CasOutcome::Conflict;
            }
            set_revision(&mut incoming, current + 1);
            *stored = incoming.clone();
            CasOutcome::Applied(incoming)
        }
        None => CasOutcome::Conflict,
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert_liveaction(&self, mut liveaction: LiveAction) -> Result<LiveAction> {
        liveaction.revision = 0;
        self.liveactions.insert(liveaction.id, liveaction.clone());
        Ok(liveaction)
    }

    async fn get_liveaction(&self, id: Uuid) -> Result<Option<LiveAction>> {
        Ok(self.liveactions.get(&id).map(|doc| doc.clone()))
    }

    async fn update_liveaction(&self, liveaction: LiveAction) -> Result<CasOutcome<LiveAction>> {
        Ok(compare_and_update(
            &self.liveactions,
            liveaction.id,
            liveaction,
            |doc| doc.revision,
            |doc, revision| doc.revision = revision,
        ))
    }

    async fn count_active_for_action(&self, action: &ActionRef) -> Result<usize> {
        Ok(self
            .liveactions
            .iter()
            .filter(|doc| doc.action == *action && doc.status.is_active())
            .count())
    }

    async fn insert_queue_entry(
        &self,
        mut entry: ExecutionQueueEntry,
    ) -> Result<ExecutionQueueEntry> {
        entry.revision = 0;
        self.queue_entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn next_eligible_entry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionQueueEntry>> {
        let mut oldest: Option<ExecutionQueueEntry> = None;
        for entry in self.queue_entries.iter() {
            if !entry.is_eligible(now) {
                continue;
            }
            let is_older = oldest
                .as_ref()
                .map(|best| entry.scheduled_start_timestamp < best.scheduled_start_timestamp)
                .unwrap_or(true);
            if is_older {
                oldest = Some(entry.clone());
            }
        }
        Ok(oldest)
    }

    async fn update_queue_entry(
        &self,
        entry: ExecutionQueueEntry,
    ) -> Result<CasOutcome<ExecutionQueueEntry>> {
        Ok(compare_and_update(
            &self.queue_entries,
            entry.id,
            entry,
            |doc| doc.revision,
            |doc, revision| doc.revision = revision,
        ))
    }

    async fn delete_queue_entry(&self, id: Uuid) -> Result<bool> {
        Ok(self.queue_entries.remove(&id).is_some())
    }

    async fn expired_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExecutionQueueEntry>> {
        Ok(self
            .queue_entries
            .iter()
            .filter(|entry| {
                entry.handling
                    && entry
                        .handling_timestamp
                        .map(|claimed_at| claimed_at <= cutoff)
                        .unwrap_or(false)
            })
            .map(|entry| entry.clone())
            .collect())
    }

    async fn insert_execution(&self, mut execution: ActionExecution) -> Result<ActionExecution> {
        execution.revision = 0;
        self.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ActionExecution>> {
        Ok(self.executions.get(&id).map(|doc| doc.clone()))
    }

    async fn get_execution_for_liveaction(
        &self,
        liveaction_id: Uuid,
    ) -> Result<Option<ActionExecution>> {
        Ok(self
            .executions
            .iter()
            .find(|doc| doc.liveaction_id == liveaction_id)
            .map(|doc| doc.clone()))
    }

    async fn update_execution(
        &self,
        execution: ActionExecution,
    ) -> Result<CasOutcome<ActionExecution>> {
        Ok(compare_and_update(
            &self.executions,
            execution.id,
            execution,
            |doc| doc.revision,
            |doc, revision| doc.revision = revision,
        ))
    }

    async fn add_child_execution(&self, parent_id: Uuid, child_id: Uuid) -> Result<()> {
        match self.executions.get_mut(&parent_id) {
            Some(mut parent) => {
                if !parent.children.contains(&child_id) {
                    parent.children.push(child_id);
                    parent.revision += 1;
                }
                Ok(())
            }
            None => Err(ConductorError::Store(format!(
                "parent execution not found: {parent_id}"
            ))),
        }
    }

    async fn insert_policy(&self, policy: Policy) -> Result<()> {
        self.policies.write().push(policy);
        Ok(())
    }

    async fn policies_for_resource(&self, resource_ref: &ActionRef) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .read()
            .iter()
            .filter(|policy| policy.resource_ref == *resource_ref)
            .cloned()
            .collect())
    }

    async fn insert_workflow(&self, mut workflow: WorkflowExecution) -> Result<WorkflowExecution> {
        workflow.revision = 0;
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        Ok(self.workflows.get(&id).map(|doc| doc.clone()))
    }

    async fn get_workflow_for_liveaction(
        &self,
        liveaction_id: Uuid,
    ) -> Result<Option<WorkflowExecution>> {
        Ok(self
            .workflows
            .iter()
            .find(|doc| doc.liveaction_id == liveaction_id)
            .map(|doc| doc.clone()))
    }

    async fn update_workflow(
        &self,
        workflow: WorkflowExecution,
    ) -> Result<CasOutcome<WorkflowExecution>> {
        Ok(compare_and_update(
            &self.workflows,
            workflow.id,
            workflow,
            |doc| doc.revision,
            |doc, revision| doc.revision = revision,
        ))
    }

    async fn insert_task(&self, mut task: TaskExecution) -> Result<TaskExecution> {
        task.revision = 0;
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<TaskExecution>> {
        Ok(self.tasks.get(&id).map(|doc| doc.clone()))
    }

    async fn update_task(&self, task: TaskExecution) -> Result<CasOutcome<TaskExecution>> {
        Ok(compare_and_update(
            &self.tasks,
            task.id,
            task,
            |doc| doc.revision,
            |doc, revision| doc.revision = revision,
        ))
    }

    async fn list_tasks(&self, workflow_id: Uuid) -> Result<Vec<TaskExecution>> {
        Ok(self
            .tasks
            .iter()
            .filter(|doc| doc.workflow_id == workflow_id)
            .map(|doc| doc.clone())
            .collect())
    }

    async fn find_task_for_child(&self, liveaction_id: Uuid) -> Result<Option<TaskExecution>> {
        Ok(self
            .tasks
            .iter()
            .find(|doc| doc.child_liveactions.contains(&liveaction_id))
            .map(|doc| doc.clone()))
    }
}
