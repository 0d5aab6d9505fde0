use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling ticket for one pending LiveAction.
///
/// Exactly one live entry exists per pending LiveAction. `handling` is the
/// optimistic claim flag: at most one scheduler holds a valid claim on a
/// given entry at any instant, enforced by compare-and-update on `revision`.
/// Entries are deleted the moment a terminal scheduling decision is made,
/// or replaced by a fresh entry when the LiveAction is re-delayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionQueueEntry {
    pub id: Uuid,
    pub liveaction_id: Uuid,
    pub scheduled_start_timestamp: DateTime<Utc>,
    pub handling: bool,
    /// When the current claim was taken; drives lease-expiry recovery.
    pub handling_timestamp: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl ExecutionQueueEntry {
    /// Create an unclaimed entry scheduled to start at `when`.
    pub fn new(liveaction_id: Uuid, when: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            liveaction_id,
            scheduled_start_timestamp: when,
            handling: false,
            handling_timestamp: None,
            revision: 0,
        }
    }

    /// Whether this entry is eligible for claiming at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.handling && self.scheduled_start_timestamp <= now
    }

    /// Whether a held claim has outlived the lease window at `now`.
    pub fn is_claim_expired(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        match (self.handling, self.handling_timestamp) {
            (true, Some(claimed_at)) => now - claimed_at > lease,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_requires_due_time_and_no_claim() {
        let now = Utc::now();
        let mut entry = ExecutionQueueEntry::new(Uuid::new_v4(), now - chrono::Duration::seconds(1));
        assert!(entry.is_eligible(now));

        entry.handling = true;
        assert!(!entry.is_eligible(now));

        entry.handling = false;
        entry.scheduled_start_timestamp = now + chrono::Duration::seconds(30);
        assert!(!entry.is_eligible(now));
    }

    #[test]
    fn test_claim_expiry() {
        let now = Utc::now();
        let mut entry = ExecutionQueueEntry::new(Uuid::new_v4(), now);
        assert!(!entry.is_claim_expired(now, chrono::Duration::seconds(60)));

        entry.handling = true;
        entry.handling_timestamp = Some(now - chrono::Duration::seconds(90));
        assert!(entry.is_claim_expired(now, chrono::Duration::seconds(60)));

        entry.handling_timestamp = Some(now - chrono::Duration::seconds(30));
        assert!(!entry.is_claim_expired(now, chrono::Duration::seconds(60)));
    }
}
