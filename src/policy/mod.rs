//! # Policy Enforcement (Admission Control)
//!
//! Per-action rules get a chance to defer or reject a claimed LiveAction
//! before it becomes SCHEDULED. Policy implementations are statically-typed
//! drivers registered under their `policy_type` at startup; the claim queue
//! consults the registry, never a concrete driver.
//!
//! Post-run evaluation happens on completion. For the concurrency policy it
//! is a no-op: a completed LiveAction simply stops counting toward the
//! active total on the next pre-run evaluation, which is what frees a slot
//! for a delayed peer.

pub mod concurrency;
pub mod registry;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{LiveAction, Policy};
use crate::store::ExecutionStore;

pub use concurrency::ConcurrencyPolicy;
pub use registry::{PolicyFailureMode, PolicyRegistry};

/// Admission decision produced by pre-run policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// No objection; proceed to SCHEDULED.
    Proceed,
    /// Defer; the claim queue re-enqueues with a backoff.
    Delay,
    /// Reject; the LiveAction is canceled outright.
    Cancel,
}

/// A statically-typed policy implementation.
#[async_trait]
pub trait PolicyDriver: Send + Sync {
    /// The `policy_type` this driver handles.
    fn policy_type(&self) -> &'static str;

    /// Evaluate before admission.
    async fn apply_pre_run(
        &self,
        policy: &Policy,
        liveaction: &LiveAction,
        store: &dyn ExecutionStore,
    ) -> Result<AdmissionDecision>;

    /// Evaluate on completion. Errors here are logged and swallowed by the
    /// registry; a misbehaving policy must not block completion bookkeeping.
    async fn apply_post_run(
        &self,
        policy: &Policy,
        liveaction: &LiveAction,
        store: &dyn ExecutionStore,
    ) -> Result<()>;
}
