//! Shared LiveAction lifecycle transition helper.
//!
//! Every component that moves a LiveAction between statuses goes through
//! [`transition_liveaction`]: a compare-and-update write retried on revision
//! conflict, a best-effort sync of the mirroring ActionExecution record, and
//! a status event published only after the write is durable. Terminal
//! statuses short-circuit, so repeated transitions are idempotent.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ConductorError, Result};
use crate::events::{EventSubject, StatusEventPublisher};
use crate::model::{LiveAction, LiveActionStatus};
use crate::store::{CasOutcome, ExecutionStore};

const MAX_CAS_ATTEMPTS: usize = 5;

/// Transition a LiveAction to `status`, applying `mutate` to the fresh
/// document before the write.
///
/// Returns the updated document, or `None` when the LiveAction is missing or
/// already terminal (both are treated as "nothing to do", never as faults).
pub async fn transition_liveaction(
    store: &dyn ExecutionStore,
    publisher: &StatusEventPublisher,
    liveaction_id: Uuid,
    status: LiveActionStatus,
    mutate: impl Fn(&mut LiveAction) + Send + Sync,
) -> Result<Option<LiveAction>> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let Some(mut liveaction) = store.get_liveaction(liveaction_id).await? else {
            return Ok(None);
        };
        if liveaction.status == status {
            return Ok(Some(liveaction));
        }
        if liveaction.status.is_terminal() {
            debug!(
                liveaction_id = %liveaction_id,
                current = %liveaction.status,
                requested = %status,
                "Transition skipped; already terminal"
            );
            return Ok(None);
        }

        liveaction.status = status;
        if status.is_terminal() && liveaction.end_timestamp.is_none() {
            liveaction.end_timestamp = Some(Utc::now());
        }
        mutate(&mut liveaction);

        match store.update_liveaction(liveaction).await? {
            CasOutcome::Applied(applied) => {
                sync_execution_record(store, &applied).await;
                let _ = publisher.publish(
                    EventSubject::LiveAction,
                    applied.id,
                    applied.revision,
                    applied.status.to_string(),
                );
                return Ok(Some(applied));
            }
            CasOutcome::Conflict => continue,
        }
    }

    Err(ConductorError::Store(format!(
        "persistent revision conflict transitioning liveaction {liveaction_id}"
    )))
}

/// Mirror status/result/timestamps onto the ActionExecution record.
/// Best-effort: the LiveAction is the source of truth, so a lost race here is
/// only logged.
async fn sync_execution_record(store: &dyn ExecutionStore, liveaction: &LiveAction) {
    for _ in 0..3 {
        let execution = match store.get_execution_for_liveaction(liveaction.id).await {
            Ok(Some(execution)) => execution,
            Ok(None) => return,
            Err(e) => {
                warn!(liveaction_id = %liveaction.id, error = %e, "Execution record sync failed");
                return;
            }
        };

        let mut updated = execution;
        updated.status = liveaction.status;
        updated.result = liveaction.result.clone();
        updated.start_timestamp = liveaction.start_timestamp;
        updated.end_timestamp = liveaction.end_timestamp;

        match store.update_execution(updated).await {
            Ok(CasOutcome::Applied(_)) => return,
            Ok(CasOutcome::Conflict) => continue,
            Err(e) => {
                warn!(liveaction_id = %liveaction.id, error = %e, "Execution record sync failed");
                return;
            }
        }
    }
    warn!(
        liveaction_id = %liveaction.id,
        "Execution record sync gave up after repeated conflicts"
    );
}
