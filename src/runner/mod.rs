//! # Leaf Runner Contract
//!
//! Runners that actually execute a leaf action's payload (process, SSH,
//! container, ...) are external collaborators. The engine hands an admitted
//! LiveAction to a runner and treats the outcome as opaque: the runner
//! reports a status, a result, and an updated context.
//!
//! Cancellation is cooperative: a runner mid-execution is never force-killed
//! by this core. It observes the LiveAction's `Canceling` status and reports
//! its own terminal status when it stops.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{LiveAction, LiveActionStatus};

/// Outcome reported by a leaf runner.
#[derive(Debug, Clone)]
pub struct RunnerOutcome {
    /// Terminal status, or `Running` when the runner detaches and will
    /// report completion out-of-band.
    pub status: LiveActionStatus,
    pub result: Option<Value>,
    pub updated_context: Option<Value>,
}

impl RunnerOutcome {
    pub fn succeeded(result: Value) -> Self {
        Self {
            status: LiveActionStatus::Succeeded,
            result: Some(result),
            updated_context: None,
        }
    }

    pub fn failed(result: Value) -> Self {
        Self {
            status: LiveActionStatus::Failed,
            result: Some(result),
            updated_context: None,
        }
    }

    /// The runner has taken ownership and will report a terminal status
    /// later through the completion path.
    pub fn detached() -> Self {
        Self {
            status: LiveActionStatus::Running,
            result: None,
            updated_context: None,
        }
    }
}

/// Executes admitted leaf LiveActions.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, liveaction: &LiveAction) -> Result<RunnerOutcome>;
}

/// Runner that completes every action immediately with an empty result.
#[derive(Debug, Default)]
pub struct NoopRunner;

#[async_trait]
impl ActionRunner for NoopRunner {
    async fn run(&self, _liveaction: &LiveAction) -> Result<RunnerOutcome> {
        Ok(RunnerOutcome::succeeded(Value::Null))
    }
}

/// Runner that leaves every action running until completion is reported
/// through the coordinator, mimicking out-of-band runner processes. Used by
/// the integration suites to exercise concurrency and cancellation paths.
#[derive(Debug, Default)]
pub struct DetachedRunner;

#[async_trait]
impl ActionRunner for DetachedRunner {
    async fn run(&self, _liveaction: &LiveAction) -> Result<RunnerOutcome> {
        Ok(RunnerOutcome::detached())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionRef, ExecutionContext};

    #[tokio::test]
    async fn test_noop_runner_succeeds() {
        let liveaction = LiveAction::new(
            ActionRef::from("core.noop"),
            serde_json::json!({}),
            ExecutionContext::default(),
        );
        let outcome = NoopRunner.run(&liveaction).await.unwrap();
        assert_eq!(outcome.status, LiveActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_detached_runner_stays_running() {
        let liveaction = LiveAction::new(
            ActionRef::from("core.long"),
            serde_json::json!({}),
            ExecutionContext::default(),
        );
        let outcome = DetachedRunner.run(&liveaction).await.unwrap();
        assert_eq!(outcome.status, LiveActionStatus::Running);
    }
}
