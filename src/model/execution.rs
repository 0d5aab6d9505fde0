use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::liveaction::{ActionRef, LiveAction};
use super::status::LiveActionStatus;

/// Durable, append-mostly execution record wrapping a LiveAction snapshot.
///
/// `parent` and `children` form the execution tree used by the pause, resume,
/// and cancel cascades. Created at request time, updated on every status
/// change; concurrent writers go through compare-and-update so the last
/// writer wins on a fresh read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: Uuid,
    pub liveaction_id: Uuid,
    pub action: ActionRef,
    pub status: LiveActionStatus,
    /// Parent execution id, when spawned by a workflow task.
    pub parent: Option<Uuid>,
    /// Child execution ids, maintained by the store as children are created.
    pub children: Vec<Uuid>,
    pub result: Option<Value>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl ActionExecution {
    /// Create the execution record for a freshly requested LiveAction.
    pub fn for_liveaction(liveaction: &LiveAction, parent: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            liveaction_id: liveaction.id,
            action: liveaction.action.clone(),
            status: liveaction.status,
            parent,
            children: Vec::new(),
            result: None,
            start_timestamp: None,
            end_timestamp: None,
            revision: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::liveaction::ExecutionContext;

    #[test]
    fn test_execution_snapshot_tracks_liveaction() {
        let liveaction = LiveAction::new(
            ActionRef::from("core.local"),
            serde_json::json!({}),
            ExecutionContext::default(),
        );
        let execution = ActionExecution::for_liveaction(&liveaction, None);
        assert_eq!(execution.liveaction_id, liveaction.id);
        assert_eq!(execution.status, LiveActionStatus::Requested);
        assert!(execution.children.is_empty());
        assert!(execution.parent.is_none());
    }
}
