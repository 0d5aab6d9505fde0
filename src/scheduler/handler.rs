//! Resolution of claimed queue entries.
//!
//! A claimed entry is handed to the policy layer and always leaves
//! resolution with a terminal scheduling decision: the LiveAction becomes
//! SCHEDULED (and is dispatched), the entry turns out to be stale and is
//! dropped, the LiveAction is re-delayed onto a fresh ticket, or it is
//! canceled by policy. A compare-and-update conflict along the way produces
//! no decision: the claim is released and the entry retried later.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::queue::ExecutionQueue;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::events::{EventSubject, StatusEventPublisher};
use crate::model::{ExecutionQueueEntry, LiveAction, LiveActionStatus};
use crate::policy::{AdmissionDecision, PolicyRegistry};
use crate::store::{CasOutcome, ExecutionStore};

/// Receives LiveActions the moment they become SCHEDULED, routing them to a
/// leaf runner or the workflow orchestration engine.
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    async fn dispatch(&self, liveaction: LiveAction) -> Result<()>;
}

/// Terminal scheduling decision for one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Admitted; the LiveAction is SCHEDULED and dispatched.
    Scheduled,
    /// Policy deferred it; a fresh delayed ticket replaced the entry.
    Delayed,
    /// Policy canceled it outright.
    Canceled,
    /// The entry was stale (missing or already-terminal LiveAction) and was
    /// dropped.
    Dropped,
    /// A revision conflict prevented a decision; the claim was released and
    /// the entry will be retried on a later tick.
    Retry,
}

/// Resolves claimed entries into scheduling decisions.
pub struct ScheduleResolver {
    store: Arc<dyn ExecutionStore>,
    queue: Arc<ExecutionQueue>,
    policies: Arc<PolicyRegistry>,
    publisher: StatusEventPublisher,
    config: SchedulerConfig,
    dispatcher: Option<Arc<dyn ExecutionDispatcher>>,
}

impl ScheduleResolver {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        queue: Arc<ExecutionQueue>,
        policies: Arc<PolicyRegistry>,
        publisher: StatusEventPublisher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            policies,
            publisher,
            config,
            dispatcher: None,
        }
    }

    /// Attach the dispatcher that receives admitted executions.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ExecutionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Resolve one claimed entry to a terminal scheduling decision.
    #[instrument(skip(self, entry), fields(entry_id = %entry.id, liveaction_id = %entry.liveaction_id))]
    pub async fn resolve(&self, entry: ExecutionQueueEntry) -> Result<ResolutionOutcome> {
        let Some(liveaction) = self.store.get_liveaction(entry.liveaction_id).await? else {
            // Stale ticket: the referenced LiveAction no longer exists. That
            // single scheduling attempt aborts; the loop continues unaffected.
            warn!("Stale queue entry; referenced LiveAction missing");
            self.queue.remove(entry.id).await?;
            return Ok(ResolutionOutcome::Dropped);
        };

        if liveaction.status.is_terminal() || liveaction.status.is_canceling_or_canceled() {
            debug!(status = %liveaction.status, "LiveAction already terminal or canceling; dropping entry");
            self.queue.remove(entry.id).await?;
            return Ok(ResolutionOutcome::Dropped);
        }

        if !liveaction.status.is_schedulable() {
            debug!(status = %liveaction.status, "LiveAction already admitted; dropping duplicate ticket");
            self.queue.remove(entry.id).await?;
            return Ok(ResolutionOutcome::Dropped);
        }

        match self.policies.apply_pre_run(&liveaction).await? {
            AdmissionDecision::Proceed => self.admit(entry, liveaction).await,
            AdmissionDecision::Delay => self.delay(entry, liveaction).await,
            AdmissionDecision::Cancel => self.cancel(entry, liveaction).await,
        }
    }

    async fn admit(
        &self,
        entry: ExecutionQueueEntry,
        liveaction: LiveAction,
    ) -> Result<ResolutionOutcome> {
        let Some(scheduled) = self
            .set_status(liveaction, LiveActionStatus::Scheduled)
            .await?
        else {
            return self.release_claim(entry).await;
        };

        self.queue.remove(entry.id).await?;
        info!(
            liveaction_id = %scheduled.id,
            action = %scheduled.action,
            "✅ SCHEDULER: Execution admitted"
        );

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(scheduled).await?;
        }
        Ok(ResolutionOutcome::Scheduled)
    }

    async fn delay(
        &self,
        entry: ExecutionQueueEntry,
        liveaction: LiveAction,
    ) -> Result<ResolutionOutcome> {
        // The policy verdict surfaces as POLICY_DELAYED; the queue converts
        // it to DELAYED with the start time pushed forward, which re-races on
        // a later tick until capacity frees.
        let Some(policy_delayed) = self
            .set_status(liveaction, LiveActionStatus::PolicyDelayed)
            .await?
        else {
            return self.release_claim(entry).await;
        };

        let Some(delayed) = self
            .set_status(policy_delayed, LiveActionStatus::Delayed)
            .await?
        else {
            return self.release_claim(entry).await;
        };

        let replacement = self
            .queue
            .replace_with_delayed(&entry, self.config.policy_delay_backoff())
            .await?;
        debug!(
            liveaction_id = %delayed.id,
            retry_at = %replacement.scheduled_start_timestamp,
            "⏸️ SCHEDULER: Execution delayed by policy"
        );
        Ok(ResolutionOutcome::Delayed)
    }

    async fn cancel(
        &self,
        entry: ExecutionQueueEntry,
        mut liveaction: LiveAction,
    ) -> Result<ResolutionOutcome> {
        liveaction.end_timestamp = Some(Utc::now());
        let Some(canceled) = self
            .set_status(liveaction, LiveActionStatus::Canceled)
            .await?
        else {
            return self.release_claim(entry).await;
        };

        self.queue.remove(entry.id).await?;
        info!(
            liveaction_id = %canceled.id,
            action = %canceled.action,
            "🚫 SCHEDULER: Execution canceled by policy"
        );
        Ok(ResolutionOutcome::Canceled)
    }

    /// Write a status through compare-and-update, sync the execution record,
    /// and publish the transition after the durable write. `None` means the
    /// revision was stale and no decision was made.
    async fn set_status(
        &self,
        mut liveaction: LiveAction,
        status: LiveActionStatus,
    ) -> Result<Option<LiveAction>> {
        liveaction.status = status;
        match self.store.update_liveaction(liveaction).await? {
            CasOutcome::Applied(updated) => {
                self.sync_execution_record(&updated).await;
                let _ = self.publisher.publish(
                    EventSubject::LiveAction,
                    updated.id,
                    updated.revision,
                    updated.status.to_string(),
                );
                Ok(Some(updated))
            }
            CasOutcome::Conflict => Ok(None),
        }
    }

    /// Best-effort snapshot sync of the ActionExecution record; a persistent
    /// conflict here is tolerable since the record converges on the next
    /// status change.
    async fn sync_execution_record(&self, liveaction: &LiveAction) {
        for _ in 0..3 {
            let execution = match self.store.get_execution_for_liveaction(liveaction.id).await {
                Ok(Some(execution)) => execution,
                _ => return,
            };
            let mut updated = execution;
            updated.status = liveaction.status;
            updated.result = liveaction.result.clone();
            updated.end_timestamp = liveaction.end_timestamp;
            match self.store.update_execution(updated).await {
                Ok(CasOutcome::Applied(_)) => return,
                Ok(CasOutcome::Conflict) => continue,
                Err(_) => return,
            }
        }
    }

    /// Release our claim so a later tick retries; losing the release race is
    /// fine (GC or the winner takes over).
    async fn release_claim(&self, mut entry: ExecutionQueueEntry) -> Result<ResolutionOutcome> {
        entry.handling = false;
        entry.handling_timestamp = None;
        let _ = self.store.update_queue_entry(entry).await?;
        Ok(ResolutionOutcome::Retry)
    }
}
