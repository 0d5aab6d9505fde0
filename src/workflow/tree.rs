//! Execution tree traversal.
//!
//! The parent/child links on ActionExecution records form an explicit
//! adjacency-by-id tree. Pause, resume, and cancel cascades traverse it
//! breadth-first, with an idempotent already-terminal short-circuit at every
//! node so cascades are safe to re-enter from any direction.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::error::{ConductorError, Result};
use crate::model::{ActionExecution, LiveAction};
use crate::store::ExecutionStore;

/// Read-only view over the execution adjacency map.
pub struct ExecutionTree<'a> {
    store: &'a dyn ExecutionStore,
}

impl<'a> ExecutionTree<'a> {
    pub fn new(store: &'a dyn ExecutionStore) -> Self {
        Self { store }
    }

    /// Walk `context.parent` links upward from a LiveAction to the root of
    /// its execution tree.
    pub async fn root_of(&self, liveaction_id: Uuid) -> Result<LiveAction> {
        let mut current = self
            .store
            .get_liveaction(liveaction_id)
            .await?
            .ok_or_else(|| {
                ConductorError::Workflow(format!("liveaction not found: {liveaction_id}"))
            })?;

        while let Some(parent_id) = current.context.parent {
            match self.store.get_liveaction(parent_id).await? {
                Some(parent) => current = parent,
                // Dangling parent link; treat the current node as root.
                None => break,
            }
        }
        Ok(current)
    }

    /// All descendants of an execution in breadth-first order, excluding the
    /// root itself.
    pub async fn descendants(&self, root_execution_id: Uuid) -> Result<Vec<ActionExecution>> {
        let mut found = Vec::new();
        let mut frontier = VecDeque::new();
        frontier.push_back(root_execution_id);

        while let Some(execution_id) = frontier.pop_front() {
            let Some(execution) = self.store.get_execution(execution_id).await? else {
                continue;
            };
            for child_id in &execution.children {
                frontier.push_back(*child_id);
            }
            if execution_id != root_execution_id {
                found.push(execution);
            }
        }
        Ok(found)
    }
}
