use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Orchestration state shared by WorkflowExecution and TaskExecution.
///
/// The legal transitions:
///
/// ```text
/// REQUESTED -> RUNNING -> {SUCCEEDED, FAILED}
/// RUNNING -> PAUSING -> PAUSED -> RESUMING -> RUNNING
/// {RUNNING, PAUSING, PAUSED} -> CANCELING -> CANCELED
/// ```
///
/// plus `REQUESTED -> FAILED` for workflows that fail static inspection and
/// `REQUESTED -> CANCELING` for cancellation before any task starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    Requested,
    Running,
    Succeeded,
    Failed,
    Pausing,
    Paused,
    Resuming,
    Canceling,
    Canceled,
}

impl OrchestrationState {
    /// Check if this is a terminal state (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Check if work may still be in flight underneath this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::Pausing | Self::Resuming | Self::Canceling
        )
    }

    /// Whether `target` is a legal next state from `self`.
    pub fn can_transition_to(&self, target: OrchestrationState) -> bool {
        use OrchestrationState::*;
        matches!(
            (self, target),
            (Requested, Running)
                | (Requested, Failed)
                | (Requested, Canceling)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Pausing)
                | (Running, Canceling)
                | (Pausing, Paused)
                | (Pausing, Failed)
                | (Pausing, Canceling)
                | (Paused, Resuming)
                | (Paused, Canceling)
                | (Resuming, Running)
                | (Resuming, Canceling)
                | (Canceling, Canceled)
        )
    }

    /// Validate a transition, returning the target on success.
    pub fn ensure_transition(
        &self,
        target: OrchestrationState,
    ) -> Result<OrchestrationState, StateError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(StateError::InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::Requested
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Pausing => write!(f, "pausing"),
            Self::Paused => write!(f, "paused"),
            Self::Resuming => write!(f, "resuming"),
            Self::Canceling => write!(f, "canceling"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// State machine violation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: OrchestrationState,
        to: OrchestrationState,
    },
}
