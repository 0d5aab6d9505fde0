//! Execution request intake.
//!
//! Turns "run this action" into the durable record set everything else
//! operates on: a LiveAction in `Requested`, its ActionExecution tree node
//! (linked to the parent when spawned by a workflow task), and a claim-queue
//! ticket. The requested event is published only after all three writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::{ConductorError, Result};
use crate::events::{EventSubject, StatusEventPublisher};
use crate::model::{ActionExecution, ActionRef, ExecutionContext, LiveAction};
use crate::registry::ActionCatalog;
use crate::scheduler::ExecutionQueue;
use crate::store::ExecutionStore;

/// Front door for execution requests, used both by external callers and by
/// the orchestration engine when spawning task children.
pub struct ExecutionRequestService {
    store: Arc<dyn ExecutionStore>,
    queue: Arc<ExecutionQueue>,
    catalog: Arc<ActionCatalog>,
    publisher: StatusEventPublisher,
}

impl ExecutionRequestService {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        queue: Arc<ExecutionQueue>,
        catalog: Arc<ActionCatalog>,
        publisher: StatusEventPublisher,
    ) -> Self {
        Self {
            store,
            queue,
            catalog,
            publisher,
        }
    }

    /// Request immediate execution of an action.
    pub async fn request(
        &self,
        action: ActionRef,
        parameters: Value,
        context: ExecutionContext,
    ) -> Result<LiveAction> {
        self.request_at(action, parameters, context, Utc::now())
            .await
    }

    /// Request execution with a future scheduled start time.
    #[instrument(skip(self, parameters, context), fields(action = %action))]
    pub async fn request_at(
        &self,
        action: ActionRef,
        parameters: Value,
        context: ExecutionContext,
        when: DateTime<Utc>,
    ) -> Result<LiveAction> {
        let registered = self.catalog.get(&action).ok_or_else(|| {
            ConductorError::Validation(format!("action not registered: {action}"))
        })?;

        let mut liveaction = LiveAction::new(action, parameters, context);
        liveaction.workflow = registered.is_workflow();
        let liveaction = self.store.insert_liveaction(liveaction).await?;

        // Anchor the invocation in the execution tree before it becomes
        // claimable, so cascades never observe a dangling node.
        let parent_execution = match liveaction.context.parent {
            Some(parent_liveaction) => self
                .store
                .get_execution_for_liveaction(parent_liveaction)
                .await?
                .map(|execution| execution.id),
            None => None,
        };
        let execution = self
            .store
            .insert_execution(ActionExecution::for_liveaction(
                &liveaction,
                parent_execution,
            ))
            .await?;
        if let Some(parent_id) = parent_execution {
            self.store
                .add_child_execution(parent_id, execution.id)
                .await?;
        }

        self.queue.enqueue(liveaction.id, when).await?;

        let _ = self.publisher.publish(
            EventSubject::LiveAction,
            liveaction.id,
            liveaction.revision,
            liveaction.status.to_string(),
        );
        info!(
            liveaction_id = %liveaction.id,
            action = %liveaction.action,
            workflow = liveaction.workflow,
            "Execution requested"
        );
        Ok(liveaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn fixture() -> (ExecutionRequestService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(ExecutionQueue::new(
            store.clone(),
            SchedulerConfig::default(),
        ));
        let catalog = Arc::new(ActionCatalog::new());
        catalog.register(ActionRef::from("core.local"), vec!["cmd".to_string()]);
        let service = ExecutionRequestService::new(
            store.clone(),
            queue,
            catalog,
            StatusEventPublisher::new(16),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_request_creates_record_set() {
        let (service, store) = fixture();

        let liveaction = service
            .request(
                ActionRef::from("core.local"),
                json!({"cmd": "date"}),
                ExecutionContext::for_user("stanley"),
            )
            .await
            .unwrap();

        assert!(store
            .get_liveaction(liveaction.id)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_execution_for_liveaction(liveaction.id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_request_unknown_action_is_rejected() {
        let (service, store) = fixture();

        let err = service
            .request(
                ActionRef::from("core.nope"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
        assert_eq!(store.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_child_request_links_execution_tree() {
        let (service, store) = fixture();

        let parent = service
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();
        let child = service
            .request(
                ActionRef::from("core.local"),
                json!({}),
                ExecutionContext::child_of(parent.id),
            )
            .await
            .unwrap();

        let parent_execution = store
            .get_execution_for_liveaction(parent.id)
            .await
            .unwrap()
            .unwrap();
        let child_execution = store
            .get_execution_for_liveaction(child.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(child_execution.parent, Some(parent_execution.id));
        assert_eq!(parent_execution.children, vec![child_execution.id]);
    }
}
