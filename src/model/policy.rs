use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::liveaction::ActionRef;

/// What a concurrency policy does with an execution at or over threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowAction {
    /// Defer and retry on a later tick until capacity frees.
    Delay,
    /// Cancel outright, no retry.
    Cancel,
}

impl Default for OverflowAction {
    fn default() -> Self {
        Self::Delay
    }
}

/// Declarative admission-control rule bound to an action reference.
///
/// `parameters` are interpreted by the driver registered for `policy_type`;
/// the scheduler treats them as opaque at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub resource_ref: ActionRef,
    pub policy_type: String,
    pub parameters: Value,
}

impl Policy {
    /// Convenience constructor for a concurrency policy.
    pub fn concurrency(
        name: impl Into<String>,
        resource_ref: ActionRef,
        threshold: usize,
        overflow_action: OverflowAction,
    ) -> Self {
        Self {
            name: name.into(),
            resource_ref,
            policy_type: "concurrency".to_string(),
            parameters: serde_json::json!({
                "threshold": threshold,
                "overflow_action": overflow_action,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_policy_shape() {
        let policy = Policy::concurrency("cap", ActionRef::from("core.local"), 2, OverflowAction::Cancel);
        assert_eq!(policy.policy_type, "concurrency");
        assert_eq!(policy.parameters["threshold"], 2);
        assert_eq!(policy.parameters["overflow_action"], "cancel");
        assert!(policy.parameters.get("action").is_none());
    }

    #[test]
    fn test_overflow_action_defaults_to_delay() {
        assert_eq!(OverflowAction::default(), OverflowAction::Delay);
    }
}
