//! Execution coordinator.
//!
//! The seam between the scheduler and the things that actually execute
//! work: admitted workflow-typed LiveActions go to the orchestration engine,
//! leaf LiveActions go to the configured runner. Completion flows back in
//! through [`ExecutionCoordinator::complete_liveaction`] regardless of
//! whether the runner finished inline or detached, and control requests
//! (pause, resume, cancel) enter here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::lifecycle::transition_liveaction;
use crate::error::{ConductorError, Result};
use crate::events::StatusEventPublisher;
use crate::model::{LiveAction, LiveActionStatus};
use crate::policy::PolicyRegistry;
use crate::runner::ActionRunner;
use crate::scheduler::ExecutionDispatcher;
use crate::store::ExecutionStore;
use crate::workflow::WorkflowEngine;

pub struct ExecutionCoordinator {
    store: Arc<dyn ExecutionStore>,
    publisher: StatusEventPublisher,
    policies: Arc<PolicyRegistry>,
    engine: Arc<WorkflowEngine>,
    runner: Arc<dyn ActionRunner>,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        publisher: StatusEventPublisher,
        policies: Arc<PolicyRegistry>,
        engine: Arc<WorkflowEngine>,
        runner: Arc<dyn ActionRunner>,
    ) -> Self {
        Self {
            store,
            publisher,
            policies,
            engine,
            runner,
        }
    }

    /// Record a terminal outcome for a LiveAction, run post-run policies,
    /// and advance any workflow waiting on it. The single completion path
    /// for inline runner results, detached runners reporting back, and
    /// cooperative cancellation.
    #[instrument(skip(self, result))]
    pub async fn complete_liveaction(
        &self,
        liveaction_id: Uuid,
        status: LiveActionStatus,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(ConductorError::Validation(format!(
                "completion status must be terminal, got {status}"
            )));
        }

        let Some(completed) = transition_liveaction(
            &*self.store,
            &self.publisher,
            liveaction_id,
            status,
            move |liveaction| liveaction.result = result.clone(),
        )
        .await?
        else {
            // Missing or already terminal; completion is idempotent.
            return Ok(());
        };

        // Post-run enforcement never blocks completion; failures are logged
        // and swallowed inside the registry.
        self.policies.apply_post_run(&completed).await;

        self.engine.on_child_complete(&completed).await?;
        Ok(())
    }

    /// Request cancellation. Workflow trees cancel through the engine's
    /// cascade; standalone leaves cancel directly, cooperatively when
    /// already running.
    #[instrument(skip(self))]
    pub async fn cancel(&self, liveaction_id: Uuid) -> Result<()> {
        let Some(liveaction) = self.store.get_liveaction(liveaction_id).await? else {
            return Err(ConductorError::Validation(format!(
                "liveaction not found: {liveaction_id}"
            )));
        };
        if liveaction.status.is_terminal() {
            return Ok(());
        }

        if liveaction.workflow || liveaction.context.parent.is_some() {
            return self.engine.cancel(liveaction_id).await;
        }

        let target = if liveaction.status.is_schedulable() {
            // Still waiting in the claim queue; the stale entry is dropped
            // at resolution.
            LiveActionStatus::Canceled
        } else {
            LiveActionStatus::Canceling
        };
        transition_liveaction(&*self.store, &self.publisher, liveaction_id, target, |_| {}).await?;
        info!(liveaction_id = %liveaction_id, target = %target, "Cancellation requested");
        Ok(())
    }

    /// Request a pause. Only workflow-typed LiveActions pause; leaves run to
    /// completion.
    pub async fn pause(&self, liveaction_id: Uuid) -> Result<()> {
        let Some(liveaction) = self.store.get_liveaction(liveaction_id).await? else {
            return Err(ConductorError::Validation(format!(
                "liveaction not found: {liveaction_id}"
            )));
        };
        if !liveaction.workflow {
            return Err(ConductorError::Validation(
                "only workflow executions can be paused".to_string(),
            ));
        }
        self.engine.pause(liveaction_id).await
    }

    /// Resume a paused workflow.
    pub async fn resume(&self, liveaction_id: Uuid) -> Result<()> {
        let Some(liveaction) = self.store.get_liveaction(liveaction_id).await? else {
            return Err(ConductorError::Validation(format!(
                "liveaction not found: {liveaction_id}"
            )));
        };
        if !liveaction.workflow {
            return Err(ConductorError::Validation(
                "only workflow executions can be resumed".to_string(),
            ));
        }
        self.engine.resume(liveaction_id).await
    }
}

#[async_trait]
impl ExecutionDispatcher for ExecutionCoordinator {
    async fn dispatch(&self, liveaction: LiveAction) -> Result<()> {
        let Some(running) = transition_liveaction(
            &*self.store,
            &self.publisher,
            liveaction.id,
            LiveActionStatus::Running,
            |la| la.start_timestamp = Some(Utc::now()),
        )
        .await?
        else {
            // Canceled or otherwise terminal between admission and dispatch.
            return Ok(());
        };

        if running.workflow {
            self.engine.request(&running).await?;
            return Ok(());
        }

        match self.runner.run(&running).await {
            Ok(outcome) if outcome.status.is_terminal() => {
                self.complete_liveaction(running.id, outcome.status, outcome.result)
                    .await
            }
            Ok(_) => {
                // Detached; the runner reports completion later.
                Ok(())
            }
            Err(e) => {
                warn!(
                    liveaction_id = %running.id,
                    action = %running.action,
                    error = %e,
                    "Runner failed; marking execution failed"
                );
                self.complete_liveaction(
                    running.id,
                    LiveActionStatus::Failed,
                    Some(json!({"error": e.to_string()})),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::model::{ActionRef, ExecutionContext};
    use crate::registry::ActionCatalog;
    use crate::runner::{DetachedRunner, NoopRunner};
    use crate::scheduler::ExecutionQueue;
    use crate::services::ExecutionRequestService;
    use crate::store::InMemoryStore;
    use crate::workflow::SimpleEvaluator;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        requests: Arc<ExecutionRequestService>,
        coordinator: ExecutionCoordinator,
    }

    async fn fixture(runner: Arc<dyn ActionRunner>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let publisher = StatusEventPublisher::new(64);
        let catalog = Arc::new(ActionCatalog::new());
        catalog.register(ActionRef::from("core.local"), Vec::new());
        let queue = Arc::new(ExecutionQueue::new(
            store.clone(),
            SchedulerConfig::default(),
        ));
        let requests = Arc::new(ExecutionRequestService::new(
            store.clone(),
            queue,
            catalog.clone(),
            publisher.clone(),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            catalog,
            Arc::new(SimpleEvaluator),
            publisher.clone(),
            requests.clone(),
        ));
        let policies = Arc::new(PolicyRegistry::with_builtin_drivers(store.clone()).await);
        let coordinator =
            ExecutionCoordinator::new(store.clone(), publisher, policies, engine, runner);
        Fixture {
            store,
            requests,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_dispatch_leaf_runs_to_completion() {
        let fixture = fixture(Arc::new(NoopRunner)).await;
        let liveaction = fixture
            .requests
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();

        fixture.coordinator.dispatch(liveaction.clone()).await.unwrap();

        let stored = fixture
            .store
            .get_liveaction(liveaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, LiveActionStatus::Succeeded);
        assert!(stored.start_timestamp.is_some());
        assert!(stored.end_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_detached_runner_completes_out_of_band() {
        let fixture = fixture(Arc::new(DetachedRunner)).await;
        let liveaction = fixture
            .requests
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();

        fixture.coordinator.dispatch(liveaction.clone()).await.unwrap();
        let stored = fixture
            .store
            .get_liveaction(liveaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, LiveActionStatus::Running);

        fixture
            .coordinator
            .complete_liveaction(
                liveaction.id,
                LiveActionStatus::Succeeded,
                Some(json!({"stdout": "ok"})),
            )
            .await
            .unwrap();
        let stored = fixture
            .store
            .get_liveaction(liveaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, LiveActionStatus::Succeeded);
        assert_eq!(stored.result, Some(json!({"stdout": "ok"})));
    }

    #[tokio::test]
    async fn test_complete_requires_terminal_status() {
        let fixture = fixture(Arc::new(NoopRunner)).await;
        let liveaction = fixture
            .requests
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();

        let err = fixture
            .coordinator
            .complete_liveaction(liveaction.id, LiveActionStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let fixture = fixture(Arc::new(NoopRunner)).await;
        let liveaction = fixture
            .requests
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();

        fixture
            .coordinator
            .complete_liveaction(liveaction.id, LiveActionStatus::Succeeded, None)
            .await
            .unwrap();
        // A late duplicate report must not flip the status
        fixture
            .coordinator
            .complete_liveaction(liveaction.id, LiveActionStatus::Failed, None)
            .await
            .unwrap();

        let stored = fixture
            .store
            .get_liveaction(liveaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, LiveActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_pending_leaf_cancels_outright() {
        let fixture = fixture(Arc::new(NoopRunner)).await;
        let liveaction = fixture
            .requests
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();

        fixture.coordinator.cancel(liveaction.id).await.unwrap();

        let stored = fixture
            .store
            .get_liveaction(liveaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, LiveActionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_pause_rejects_leaf_actions() {
        let fixture = fixture(Arc::new(NoopRunner)).await;
        let liveaction = fixture
            .requests
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();

        let err = fixture.coordinator.pause(liveaction.id).await.unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }
}
