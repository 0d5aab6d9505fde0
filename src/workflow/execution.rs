use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::definition::WorkflowDefinition;
use super::inspection::WorkflowError;
use super::states::OrchestrationState;

/// Orchestration state for one workflow-typed LiveAction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub liveaction_id: Uuid,
    /// The ActionExecution record anchoring this workflow in the execution
    /// tree used by cascades.
    pub execution_id: Uuid,
    pub definition: WorkflowDefinition,
    /// Workflow context object; rendered input and vars plus everything
    /// published by completed tasks.
    pub context: Value,
    pub status: OrchestrationState,
    pub output: Option<Value>,
    pub errors: Vec<WorkflowError>,
    pub revision: u64,
}

impl WorkflowExecution {
    pub fn new(
        liveaction_id: Uuid,
        execution_id: Uuid,
        definition: WorkflowDefinition,
        context: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            liveaction_id,
            execution_id,
            definition,
            context,
            status: OrchestrationState::Requested,
            output: None,
            errors: Vec::new(),
            revision: 0,
        }
    }
}

/// Per-item fan-out bookkeeping for a with-items task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsState {
    pub items: Vec<Value>,
    /// Next item index not yet dispatched.
    pub next_index: usize,
    /// Concurrency cap; `None` dispatches every item at once.
    pub concurrency: Option<usize>,
    /// Terminal state per item, once known.
    pub item_status: Vec<Option<OrchestrationState>>,
    pub item_results: Vec<Option<Value>>,
    /// Child LiveAction id -> item index, for completion routing.
    pub child_item: HashMap<Uuid, usize>,
}

impl ItemsState {
    pub fn new(items: Vec<Value>, concurrency: Option<usize>) -> Self {
        let count = items.len();
        Self {
            items,
            next_index: 0,
            concurrency,
            item_status: vec![None; count],
            item_results: vec![None; count],
            child_item: HashMap::new(),
        }
    }

    /// Number of dispatched items that have not yet reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.child_item
            .values()
            .filter(|index| self.item_status[**index].is_none())
            .count()
    }

    /// Whether every item has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.item_status.iter().all(Option::is_some)
    }

    /// Whether every item succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.item_status
            .iter()
            .all(|status| *status == Some(OrchestrationState::Succeeded))
    }

    /// How many more items may be dispatched right now under the cap.
    pub fn dispatchable(&self) -> usize {
        let remaining = self.items.len().saturating_sub(self.next_index);
        match self.concurrency {
            Some(cap) => cap.saturating_sub(self.active_count()).min(remaining),
            None => remaining,
        }
    }
}

/// One task instance inside a workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub task_name: String,
    pub status: OrchestrationState,
    /// Child LiveAction ids spawned by this task (one for a plain task, one
    /// per item for with-items).
    pub child_liveactions: Vec<Uuid>,
    pub items: Option<ItemsState>,
    /// Set once outgoing transitions have been applied; completions observed
    /// while the workflow is pausing defer transition handling until resume.
    pub transitions_handled: bool,
    pub result: Option<Value>,
    pub revision: u64,
}

impl TaskExecution {
    pub fn new(workflow_id: Uuid, task_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            task_name: task_name.into(),
            status: OrchestrationState::Requested,
            child_liveactions: Vec::new(),
            items: None,
            transitions_handled: false,
            result: None,
            revision: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_state_dispatchable_respects_cap() {
        let mut items = ItemsState::new(vec![json!(1), json!(2), json!(3)], Some(2));
        assert_eq!(items.dispatchable(), 2);

        // Simulate two dispatched, none terminal
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        items.child_item.insert(a, 0);
        items.child_item.insert(b, 1);
        items.next_index = 2;
        assert_eq!(items.active_count(), 2);
        assert_eq!(items.dispatchable(), 0);

        // One completes; a slot frees and the remaining item fits in it
        items.item_status[0] = Some(OrchestrationState::Succeeded);
        assert_eq!(items.active_count(), 1);
        assert_eq!(items.dispatchable(), 1);
    }

    #[test]
    fn test_items_state_unbounded_dispatches_everything() {
        let items = ItemsState::new(vec![json!("a"), json!("b"), json!("c")], None);
        assert_eq!(items.dispatchable(), 3);
    }

    #[test]
    fn test_items_aggregation() {
        let mut items = ItemsState::new(vec![json!(1), json!(2)], None);
        items.item_status[0] = Some(OrchestrationState::Succeeded);
        assert!(!items.all_terminal());
        items.item_status[1] = Some(OrchestrationState::Failed);
        assert!(items.all_terminal());
        assert!(!items.all_succeeded());
    }
}
