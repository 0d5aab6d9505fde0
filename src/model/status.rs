use std::fmt;

use serde::{Deserialize, Serialize};

/// LiveAction status lifecycle.
///
/// Scheduling states (`Requested` through `Running`) are owned by the claim
/// queue and policy layer; the pause/cancel legs are driven by the workflow
/// orchestration engine and by user control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveActionStatus {
    /// Initial state when the invocation is created
    Requested,
    /// Admitted by the claim queue and policy layer, awaiting a runner
    Scheduled,
    /// Waiting for a future scheduled start time
    Delayed,
    /// Deferred by an admission-control policy
    PolicyDelayed,
    /// Currently executing
    Running,
    /// Completed successfully
    Succeeded,
    /// Completed with an error
    Failed,
    /// Cancellation requested, awaiting cooperative shutdown
    Canceling,
    /// Cancelled
    Canceled,
    /// Pause requested, awaiting quiescence
    Pausing,
    /// Paused
    Paused,
    /// Resume requested
    Resuming,
}

impl LiveActionStatus {
    /// Check if this is a terminal status (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Check if this status counts toward an action's active total for
    /// concurrency-policy evaluation (admitted but not yet completed).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }

    /// Check if this status is eligible for claim-queue resolution.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Requested | Self::Delayed | Self::PolicyDelayed)
    }

    /// Check if cancellation has been requested or completed.
    pub fn is_canceling_or_canceled(&self) -> bool {
        matches!(self, Self::Canceling | Self::Canceled)
    }
}

impl Default for LiveActionStatus {
    fn default() -> Self {
        Self::Requested
    }
}

impl fmt::Display for LiveActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Delayed => write!(f, "delayed"),
            Self::PolicyDelayed => write!(f, "policy_delayed"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Canceling => write!(f, "canceling"),
            Self::Canceled => write!(f, "canceled"),
            Self::Pausing => write!(f, "pausing"),
            Self::Paused => write!(f, "paused"),
            Self::Resuming => write!(f, "resuming"),
        }
    }
}

impl std::str::FromStr for LiveActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "scheduled" => Ok(Self::Scheduled),
            "delayed" => Ok(Self::Delayed),
            "policy_delayed" => Ok(Self::PolicyDelayed),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            "pausing" => Ok(Self::Pausing),
            "paused" => Ok(Self::Paused),
            "resuming" => Ok(Self::Resuming),
            _ => Err(format!("Invalid liveaction status: {s}")),
        }
    }
}
