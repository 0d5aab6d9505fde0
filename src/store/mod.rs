//! # Execution Store
//!
//! The durable document store the claim queue, policy layer, and
//! orchestration engine read and write through. The store is an external
//! collaborator in production; this module defines its contract and ships an
//! in-memory reference implementation used by the engine's test suites.
//!
//! ## Compare-and-update contract
//!
//! Every mutation of a shared record goes through a compare-and-update keyed
//! on the document's `revision`. A stale revision makes the write *fail*
//! (`CasOutcome::Conflict`), never error and never partially apply, and every
//! caller treats that failure as "retry later". This is the only coordination
//! mechanism between concurrently running scheduler processes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ActionExecution, ActionRef, ExecutionQueueEntry, LiveAction, Policy};
use crate::workflow::{TaskExecution, WorkflowExecution};

pub use memory::InMemoryStore;

/// Outcome of a compare-and-update write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The write applied; the returned document carries the bumped revision.
    Applied(T),
    /// The document revision changed since it was read; nothing was written.
    Conflict,
}

impl<T> CasOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(doc) => Some(doc),
            Self::Conflict => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Durable store contract for all shared execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    // --- LiveActions ---

    async fn insert_liveaction(&self, liveaction: LiveAction) -> Result<LiveAction>;
    async fn get_liveaction(&self, id: Uuid) -> Result<Option<LiveAction>>;
    /// Compare-and-update keyed on `liveaction.revision`.
    async fn update_liveaction(&self, liveaction: LiveAction) -> Result<CasOutcome<LiveAction>>;
    /// Count LiveActions for `action` in an active scheduling status
    /// (SCHEDULED or RUNNING); the concurrency policy evaluates this against
    /// its threshold.
    async fn count_active_for_action(&self, action: &ActionRef) -> Result<usize>;

    // --- Queue entries ---

    async fn insert_queue_entry(&self, entry: ExecutionQueueEntry) -> Result<ExecutionQueueEntry>;
    /// The single oldest entry with `scheduled_start_timestamp <= now` and
    /// `handling = false`, FIFO by scheduled time.
    async fn next_eligible_entry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionQueueEntry>>;
    /// Compare-and-update keyed on `entry.revision`.
    async fn update_queue_entry(
        &self,
        entry: ExecutionQueueEntry,
    ) -> Result<CasOutcome<ExecutionQueueEntry>>;
    /// Delete an entry; returns false if it was already gone.
    async fn delete_queue_entry(&self, id: Uuid) -> Result<bool>;
    /// Entries claimed at or before `cutoff` and still unresolved.
    async fn expired_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExecutionQueueEntry>>;

    // --- Action executions (the cascade tree) ---

    async fn insert_execution(&self, execution: ActionExecution) -> Result<ActionExecution>;
    async fn get_execution(&self, id: Uuid) -> Result<Option<ActionExecution>>;
    async fn get_execution_for_liveaction(
        &self,
        liveaction_id: Uuid,
    ) -> Result<Option<ActionExecution>>;
    async fn update_execution(
        &self,
        execution: ActionExecution,
    ) -> Result<CasOutcome<ActionExecution>>;
    /// Append `child_id` to the parent's children list (tree maintenance,
    /// retried internally on revision conflict).
    async fn add_child_execution(&self, parent_id: Uuid, child_id: Uuid) -> Result<()>;

    // --- Policies ---

    async fn insert_policy(&self, policy: Policy) -> Result<()>;
    async fn policies_for_resource(&self, resource_ref: &ActionRef) -> Result<Vec<Policy>>;

    // --- Workflow orchestration state ---

    async fn insert_workflow(&self, workflow: WorkflowExecution) -> Result<WorkflowExecution>;
    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowExecution>>;
    async fn get_workflow_for_liveaction(
        &self,
        liveaction_id: Uuid,
    ) -> Result<Option<WorkflowExecution>>;
    async fn update_workflow(
        &self,
        workflow: WorkflowExecution,
    ) -> Result<CasOutcome<WorkflowExecution>>;

    async fn insert_task(&self, task: TaskExecution) -> Result<TaskExecution>;
    async fn get_task(&self, id: Uuid) -> Result<Option<TaskExecution>>;
    async fn update_task(&self, task: TaskExecution) -> Result<CasOutcome<TaskExecution>>;
    async fn list_tasks(&self, workflow_id: Uuid) -> Result<Vec<TaskExecution>>;
    /// Locate the task execution that spawned the given child LiveAction.
    async fn find_task_for_child(&self, liveaction_id: Uuid) -> Result<Option<TaskExecution>>;
}
