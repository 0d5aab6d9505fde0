//! Policy driver registry.
//!
//! Maps `policy_type` strings to statically-typed drivers, registered at
//! startup. The claim queue asks the registry to evaluate every policy bound
//! to an action; the registry owns the fold over individual decisions and
//! the failure-mode handling.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::{AdmissionDecision, ConcurrencyPolicy, PolicyDriver};
use crate::model::LiveAction;
use crate::store::ExecutionStore;

/// What to do when a driver errors during pre-run evaluation.
///
/// Post-run failures always fail open (logged and swallowed); pre-run
/// behavior is configurable per policy type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFailureMode {
    /// Treat the driver error as "no objection" and proceed.
    FailOpen,
    /// Treat the driver error as a deferral; the execution is re-delayed and
    /// retried once the driver recovers.
    FailClosed,
}

struct RegisteredDriver {
    driver: Arc<dyn PolicyDriver>,
    failure_mode: PolicyFailureMode,
}

/// Registry of policy drivers keyed by `policy_type`.
pub struct PolicyRegistry {
    drivers: RwLock<HashMap<String, RegisteredDriver>>,
    store: Arc<dyn ExecutionStore>,
}

impl PolicyRegistry {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Registry pre-loaded with the built-in drivers.
    pub async fn with_builtin_drivers(store: Arc<dyn ExecutionStore>) -> Self {
        let registry = Self::new(store);
        registry
            .register(Arc::new(ConcurrencyPolicy), PolicyFailureMode::FailOpen)
            .await;
        registry
    }

    /// Register a driver under its policy type.
    pub async fn register(&self, driver: Arc<dyn PolicyDriver>, failure_mode: PolicyFailureMode) {
        let policy_type = driver.policy_type().to_string();
        debug!(policy_type = %policy_type, failure_mode = ?failure_mode, "Registered policy driver");
        self.drivers.write().await.insert(
            policy_type,
            RegisteredDriver {
                driver,
                failure_mode,
            },
        );
    }

    /// Evaluate every policy bound to the LiveAction's action before
    /// admission. Cancel dominates Delay dominates Proceed.
    pub async fn apply_pre_run(&self, liveaction: &LiveAction) -> crate::error::Result<AdmissionDecision> {
        let policies = self
            .store
            .policies_for_resource(&liveaction.action)
            .await?;

        let mut decision = AdmissionDecision::Proceed;
        let drivers = self.drivers.read().await;

        for policy in &policies {
            let Some(registered) = drivers.get(&policy.policy_type) else {
                warn!(
                    policy = %policy.name,
                    policy_type = %policy.policy_type,
                    "No driver registered for policy type; skipping"
                );
                continue;
            };

            let contribution = match registered
                .driver
                .apply_pre_run(policy, liveaction, self.store.as_ref())
                .await
            {
                Ok(contribution) => contribution,
                Err(e) => match registered.failure_mode {
                    PolicyFailureMode::FailOpen => {
                        error!(
                            policy = %policy.name,
                            liveaction_id = %liveaction.id,
                            error = %e,
                            "Policy pre-run failed; failing open"
                        );
                        AdmissionDecision::Proceed
                    }
                    PolicyFailureMode::FailClosed => {
                        error!(
                            policy = %policy.name,
                            liveaction_id = %liveaction.id,
                            error = %e,
                            "Policy pre-run failed; failing closed (delay)"
                        );
                        AdmissionDecision::Delay
                    }
                },
            };

            decision = match (decision, contribution) {
                (_, AdmissionDecision::Cancel) | (AdmissionDecision::Cancel, _) => {
                    AdmissionDecision::Cancel
                }
                (_, AdmissionDecision::Delay) | (AdmissionDecision::Delay, _) => {
                    AdmissionDecision::Delay
                }
                _ => AdmissionDecision::Proceed,
            };
        }

        Ok(decision)
    }

    /// Evaluate every policy on completion. Driver errors are logged and
    /// swallowed: a misbehaving policy must not block completion bookkeeping.
    pub async fn apply_post_run(&self, liveaction: &LiveAction) {
        let policies = match self
            .store
            .policies_for_resource(&liveaction.action)
            .await
        {
            Ok(policies) => policies,
            Err(e) => {
                error!(
                    liveaction_id = %liveaction.id,
                    error = %e,
                    "Failed to load policies for post-run evaluation"
                );
                return;
            }
        };

        let drivers = self.drivers.read().await;
        for policy in &policies {
            let Some(registered) = drivers.get(&policy.policy_type) else {
                continue;
            };
            if let Err(e) = registered
                .driver
                .apply_post_run(policy, liveaction, self.store.as_ref())
                .await
            {
                error!(
                    policy = %policy.name,
                    liveaction_id = %liveaction.id,
                    error = %e,
                    "Policy post-run failed; ignoring"
                );
            }
        }
    }
}
