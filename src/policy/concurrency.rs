//! Concurrency policy: caps the number of simultaneously active executions
//! of one action.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{AdmissionDecision, PolicyDriver};
use crate::error::{ConductorError, Result};
use crate::model::{LiveAction, OverflowAction, Policy};
use crate::store::ExecutionStore;

/// Parameters understood by the concurrency driver.
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyParameters {
    pub threshold: usize,
    // Older policy documents used the bare "action" key
    #[serde(default, alias = "action")]
    pub overflow_action: OverflowAction,
}

/// Counts currently active LiveActions (SCHEDULED + RUNNING) in the action's
/// scope against `threshold`.
///
/// A delayed LiveAction holds no reserved position: every retry re-races
/// against the live active count, so delayed peers are FIFO only relative to
/// their own re-delay schedule.
#[derive(Debug, Default)]
pub struct ConcurrencyPolicy;

#[async_trait]
impl PolicyDriver for ConcurrencyPolicy {
    fn policy_type(&self) -> &'static str {
        "concurrency"
    }

    async fn apply_pre_run(
        &self,
        policy: &Policy,
        liveaction: &LiveAction,
        store: &dyn ExecutionStore,
    ) -> Result<AdmissionDecision> {
        let params: ConcurrencyParameters = serde_json::from_value(policy.parameters.clone())
            .map_err(|e| {
                ConductorError::Policy(format!(
                    "invalid concurrency parameters for policy {}: {e}",
                    policy.name
                ))
            })?;

        let active = store.count_active_for_action(&liveaction.action).await?;

        if active < params.threshold {
            return Ok(AdmissionDecision::Proceed);
        }

        debug!(
            liveaction_id = %liveaction.id,
            action = %liveaction.action,
            active = active,
            threshold = params.threshold,
            overflow = ?params.overflow_action,
            "Concurrency threshold reached"
        );

        match params.overflow_action {
            OverflowAction::Delay => Ok(AdmissionDecision::Delay),
            OverflowAction::Cancel => Ok(AdmissionDecision::Cancel),
        }
    }

    async fn apply_post_run(
        &self,
        _policy: &Policy,
        _liveaction: &LiveAction,
        _store: &dyn ExecutionStore,
    ) -> Result<()> {
        // Completion frees a slot implicitly: the finished LiveAction no
        // longer counts as active on the next pre-run evaluation.
        Ok(())
    }
}
