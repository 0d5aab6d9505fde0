//! # Execution Claim Queue
//!
//! Admits backlog entries into scheduling exactly-once across multiple
//! concurrently running scheduler instances. The single invariant the whole
//! design exists to provide: at most one worker holds a valid claim on a
//! given queue entry at any instant.
//!
//! Claiming is optimistic. `claim_next` selects the oldest eligible entry
//! and races to flip its `handling` flag with a compare-and-update keyed on
//! the entry revision. Losing that race is not an error; the caller simply
//! retries on the next poll tick. Crashed workers are recovered by the GC
//! sweep, which resets claims older than the lease window.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::model::ExecutionQueueEntry;
use crate::store::{CasOutcome, ExecutionStore};

/// Claim-based scheduling queue over the shared store.
pub struct ExecutionQueue {
    store: Arc<dyn ExecutionStore>,
    config: SchedulerConfig,
}

impl ExecutionQueue {
    pub fn new(store: Arc<dyn ExecutionStore>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Create a scheduling ticket for a LiveAction, due at `when` (now for
    /// immediate scheduling, or a future time for delayed runs and policy
    /// re-delays).
    #[instrument(skip(self))]
    pub async fn enqueue(
        &self,
        liveaction_id: Uuid,
        when: chrono::DateTime<Utc>,
    ) -> Result<ExecutionQueueEntry> {
        let entry = self
            .store
            .insert_queue_entry(ExecutionQueueEntry::new(liveaction_id, when))
            .await?;
        debug!(
            entry_id = %entry.id,
            liveaction_id = %liveaction_id,
            scheduled_start = %when,
            "Enqueued execution"
        );
        Ok(entry)
    }

    /// Attempt to claim the single oldest eligible entry.
    ///
    /// Returns `Ok(None)` both when the backlog is empty and when another
    /// scheduler won the claim race — the normal "lost the race" outcome.
    /// At most one entry is returned per call.
    pub async fn claim_next(&self) -> Result<Option<ExecutionQueueEntry>> {
        let now = Utc::now();
        let Some(entry) = self.store.next_eligible_entry(now).await? else {
            return Ok(None);
        };

        let mut claimed = entry;
        claimed.handling = true;
        claimed.handling_timestamp = Some(now);

        match self.store.update_queue_entry(claimed).await? {
            CasOutcome::Applied(entry) => {
                debug!(
                    entry_id = %entry.id,
                    liveaction_id = %entry.liveaction_id,
                    "Claimed queue entry"
                );
                Ok(Some(entry))
            }
            CasOutcome::Conflict => {
                // Another scheduler instance claimed it first; retry next tick.
                debug!("Lost claim race; will retry on next poll tick");
                Ok(None)
            }
        }
    }

    /// Reset the claim on entries held longer than the lease window,
    /// recovering from workers that crashed mid-resolution.
    ///
    /// Each expired claim is reset through compare-and-update, so concurrent
    /// GC sweeps reclaim an entry exactly once.
    #[instrument(skip(self))]
    pub async fn garbage_collect(&self) -> Result<usize> {
        let lease = Duration::from_std(self.config.claim_lease())
            .unwrap_or_else(|_| Duration::seconds(60));
        let cutoff = Utc::now() - lease;

        let expired = self.store.expired_claims(cutoff).await?;
        let mut reclaimed = 0;

        for entry in expired {
            let entry_id = entry.id;
            let mut reset = entry;
            reset.handling = false;
            reset.handling_timestamp = None;

            match self.store.update_queue_entry(reset).await? {
                CasOutcome::Applied(_) => {
                    warn!(
                        entry_id = %entry_id,
                        "♻️ GC: Reclaimed expired claim (worker presumed crashed)"
                    );
                    reclaimed += 1;
                }
                CasOutcome::Conflict => {
                    // Resolved or reclaimed by someone else since the scan.
                    debug!(entry_id = %entry_id, "GC: entry changed since scan; skipping");
                }
            }
        }

        if reclaimed > 0 {
            info!(reclaimed = reclaimed, "♻️ GC: sweep complete");
        }
        Ok(reclaimed)
    }

    /// Delete an entry once a terminal scheduling decision exists for it.
    pub async fn remove(&self, entry_id: Uuid) -> Result<bool> {
        self.store.delete_queue_entry(entry_id).await
    }

    /// Replace a claimed entry with a fresh delayed ticket. The old entry is
    /// deleted and a new one created with the pushed-forward start time, so
    /// the one-live-entry-per-pending-LiveAction invariant holds.
    pub async fn replace_with_delayed(
        &self,
        entry: &ExecutionQueueEntry,
        delay: std::time::Duration,
    ) -> Result<ExecutionQueueEntry> {
        self.remove(entry.id).await?;
        let when = Utc::now()
            + Duration::from_std(delay).unwrap_or_else(|_| Duration::milliseconds(500));
        self.enqueue(entry.liveaction_id, when).await
    }
}
