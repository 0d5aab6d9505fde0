//! Admission-control policy behavior through the full scheduling path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use conductor_core::config::SchedulerConfig;
use conductor_core::model::{
    ActionRef, ExecutionContext, LiveActionStatus, OverflowAction, Policy,
};
use conductor_core::runner::DetachedRunner;
use conductor_core::store::ExecutionStore;

use common::{drive, harness, Harness};

async fn constrained_harness(threshold: usize, overflow: OverflowAction) -> Harness {
    let config = SchedulerConfig {
        policy_delay_backoff_ms: 50,
        ..SchedulerConfig::default()
    };
    let harness = harness(Arc::new(DetachedRunner), config).await;
    harness
        .catalog
        .register(ActionRef::from("core.deploy"), Vec::new());
    harness
        .store
        .insert_policy(Policy::concurrency(
            "deploy-cap",
            ActionRef::from("core.deploy"),
            threshold,
            overflow,
        ))
        .await
        .unwrap();
    harness
}

async fn request_n(harness: &Harness, n: usize) -> Vec<uuid::Uuid> {
    let mut ids = Vec::new();
    for _ in 0..n {
        let liveaction = harness
            .requests
            .request(
                ActionRef::from("core.deploy"),
                serde_json::json!({}),
                ExecutionContext::default(),
            )
            .await
            .unwrap();
        ids.push(liveaction.id);
    }
    ids
}

async fn statuses(harness: &Harness, ids: &[uuid::Uuid]) -> Vec<LiveActionStatus> {
    let mut out = Vec::new();
    for id in ids {
        out.push(
            harness
                .store
                .get_liveaction(*id)
                .await
                .unwrap()
                .unwrap()
                .status,
        );
    }
    out
}

#[tokio::test]
async fn test_threshold_delays_overflow_until_capacity_frees() {
    let harness = constrained_harness(2, OverflowAction::Delay).await;
    let ids = request_n(&harness, 3).await;

    drive(&harness).await;

    let observed = statuses(&harness, &ids).await;
    assert_eq!(
        observed
            .iter()
            .filter(|s| **s == LiveActionStatus::Running)
            .count(),
        2
    );
    assert_eq!(
        observed
            .iter()
            .filter(|s| **s == LiveActionStatus::Delayed)
            .count(),
        1
    );
    // The deferred execution still has exactly one (future-dated) ticket
    assert_eq!(harness.store.queue_len(), 1);

    // One running execution completes; once the backoff elapses the
    // deferred one is admitted
    let running = ids
        .iter()
        .zip(&observed)
        .find(|(_, s)| **s == LiveActionStatus::Running)
        .map(|(id, _)| *id)
        .unwrap();
    harness
        .coordinator
        .complete_liveaction(running, LiveActionStatus::Succeeded, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    drive(&harness).await;

    let observed = statuses(&harness, &ids).await;
    assert_eq!(
        observed
            .iter()
            .filter(|s| **s == LiveActionStatus::Running)
            .count(),
        2
    );
    assert!(observed.contains(&LiveActionStatus::Succeeded));
    assert_eq!(harness.store.queue_len(), 0);
}

#[tokio::test]
async fn test_cancel_overflow_cancels_instead_of_delaying() {
    let harness = constrained_harness(1, OverflowAction::Cancel).await;
    let ids = request_n(&harness, 2).await;

    drive(&harness).await;

    let observed = statuses(&harness, &ids).await;
    assert!(observed.contains(&LiveActionStatus::Running));
    assert!(observed.contains(&LiveActionStatus::Canceled));
    assert_eq!(harness.store.queue_len(), 0);

    let canceled = ids
        .iter()
        .zip(&observed)
        .find(|(_, s)| **s == LiveActionStatus::Canceled)
        .map(|(id, _)| *id)
        .unwrap();
    let stored = harness
        .store
        .get_liveaction(canceled)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.end_timestamp.is_some());
}

#[tokio::test]
async fn test_unknown_policy_type_is_skipped() {
    let config = SchedulerConfig::default();
    let harness = harness(Arc::new(DetachedRunner), config).await;
    harness
        .catalog
        .register(ActionRef::from("core.deploy"), Vec::new());
    harness
        .store
        .insert_policy(Policy {
            name: "mystery".to_string(),
            resource_ref: ActionRef::from("core.deploy"),
            policy_type: "does-not-exist".to_string(),
            parameters: serde_json::json!({}),
        })
        .await
        .unwrap();

    let ids = request_n(&harness, 1).await;
    drive(&harness).await;

    assert_eq!(
        statuses(&harness, &ids).await,
        vec![LiveActionStatus::Running]
    );
}

#[tokio::test]
async fn test_policies_only_bind_their_own_action() {
    let harness = constrained_harness(1, OverflowAction::Cancel).await;
    harness
        .catalog
        .register(ActionRef::from("core.other"), Vec::new());

    // Saturate the constrained action, then request a different one
    request_n(&harness, 1).await;
    let other = harness
        .requests
        .request(
            ActionRef::from("core.other"),
            serde_json::json!({}),
            ExecutionContext::default(),
        )
        .await
        .unwrap();

    drive(&harness).await;

    let stored = harness
        .store
        .get_liveaction(other.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LiveActionStatus::Running);
}
