use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::status::LiveActionStatus;

/// Fully-qualified reference to a registered action, e.g. `core.local`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRef(pub String);

impl ActionRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActionRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Request context carried by a LiveAction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Requesting user, if known.
    pub user: Option<String>,
    /// Parent LiveAction id when this invocation was spawned by a workflow
    /// task.
    pub parent: Option<Uuid>,
}

impl ExecutionContext {
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            parent: None,
        }
    }

    pub fn child_of(parent: Uuid) -> Self {
        Self {
            user: None,
            parent: Some(parent),
        }
    }
}

/// One requested invocation of an action, leaf or workflow.
///
/// Owned by the requester; mutated by the claim queue, policy layer, runners,
/// and the orchestration engine, always through the store's compare-and-update
/// keyed on `revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveAction {
    pub id: Uuid,
    pub action: ActionRef,
    /// True when the referenced action is workflow-typed and is evaluated by
    /// the orchestration engine instead of a leaf runner.
    pub workflow: bool,
    pub parameters: Value,
    pub context: ExecutionContext,
    pub status: LiveActionStatus,
    pub result: Option<Value>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    /// Store document revision; bumped by every applied compare-and-update.
    pub revision: u64,
}

impl LiveAction {
    /// Create a new LiveAction in the `Requested` status.
    pub fn new(action: ActionRef, parameters: Value, context: ExecutionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            workflow: false,
            parameters,
            context,
            status: LiveActionStatus::Requested,
            result: None,
            start_timestamp: None,
            end_timestamp: None,
            revision: 0,
        }
    }

    /// Mark this invocation as workflow-typed.
    pub fn as_workflow(mut self) -> Self {
        self.workflow = true;
        self
    }
}
