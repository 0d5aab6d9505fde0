//! Claim queue behavior across concurrent scheduler instances.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use conductor_core::config::SchedulerConfig;
use conductor_core::events::EventSubject;
use conductor_core::model::{ActionRef, ExecutionContext, ExecutionQueueEntry, LiveActionStatus};
use conductor_core::runner::NoopRunner;
use conductor_core::scheduler::ExecutionQueue;
use conductor_core::store::{ExecutionStore, InMemoryStore};

use common::{drive, harness};

#[tokio::test]
async fn test_concurrent_claimers_never_share_an_entry() {
    let store = Arc::new(InMemoryStore::new());
    let backlog = 40;
    let workers = 8;

    let seed_queue = ExecutionQueue::new(store.clone(), SchedulerConfig::default());
    for _ in 0..backlog {
        seed_queue
            .enqueue(Uuid::new_v4(), Utc::now() - Duration::seconds(10))
            .await
            .unwrap();
    }

    // Independent queue instances over the same store, like separate
    // scheduler processes
    let mut handles = Vec::new();
    for _ in 0..workers {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let queue = ExecutionQueue::new(store, SchedulerConfig::default());
            let mut won = Vec::new();
            let mut idle_rounds = 0;
            while idle_rounds < 5 {
                match queue.claim_next().await.unwrap() {
                    Some(entry) => {
                        idle_rounds = 0;
                        won.push(entry.id);
                    }
                    None => {
                        idle_rounds += 1;
                        tokio::task::yield_now().await;
                    }
                }
            }
            won
        }));
    }

    let mut all_claims = Vec::new();
    for handle in handles {
        all_claims.extend(handle.await.unwrap());
    }

    let unique: HashSet<Uuid> = all_claims.iter().copied().collect();
    assert_eq!(
        unique.len(),
        all_claims.len(),
        "an entry was claimed by more than one worker"
    );
    assert_eq!(unique.len(), backlog);
}

#[tokio::test]
async fn test_concurrent_gc_sweeps_reclaim_each_claim_once() {
    let store = Arc::new(InMemoryStore::new());
    let expired = 20;

    for _ in 0..expired {
        let mut entry =
            ExecutionQueueEntry::new(Uuid::new_v4(), Utc::now() - Duration::seconds(300));
        entry.handling = true;
        entry.handling_timestamp = Some(Utc::now() - Duration::seconds(120));
        store.insert_queue_entry(entry).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let queue = ExecutionQueue::new(store, SchedulerConfig::default());
            queue.garbage_collect().await.unwrap()
        }));
    }

    let mut total_reclaimed = 0;
    for handle in handles {
        total_reclaimed += handle.await.unwrap();
    }
    assert_eq!(total_reclaimed, expired);
}

#[tokio::test]
async fn test_requested_leaf_flows_to_success_through_the_queue() {
    let harness = harness(Arc::new(NoopRunner), SchedulerConfig::default()).await;
    harness
        .catalog
        .register(ActionRef::from("core.local"), vec!["cmd".to_string()]);

    let liveaction = harness
        .requests
        .request(
            ActionRef::from("core.local"),
            serde_json::json!({"cmd": "date"}),
            ExecutionContext::for_user("stanley"),
        )
        .await
        .unwrap();

    drive(&harness).await;

    let stored = harness
        .store
        .get_liveaction(liveaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LiveActionStatus::Succeeded);
    assert_eq!(harness.store.queue_len(), 0);

    let execution = harness
        .store
        .get_execution_for_liveaction(liveaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, LiveActionStatus::Succeeded);
}

#[tokio::test]
async fn test_status_events_trail_durable_writes_in_order() {
    let harness = harness(Arc::new(NoopRunner), SchedulerConfig::default()).await;
    harness
        .catalog
        .register(ActionRef::from("core.local"), Vec::new());
    let mut events = harness.publisher.subscribe();

    let liveaction = harness
        .requests
        .request(
            ActionRef::from("core.local"),
            serde_json::json!({}),
            ExecutionContext::default(),
        )
        .await
        .unwrap();

    drive(&harness).await;

    let mut observed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.subject == EventSubject::LiveAction && event.id == liveaction.id {
            observed.push((event.status, event.revision));
        }
    }

    let statuses: Vec<&str> = observed.iter().map(|(status, _)| status.as_str()).collect();
    assert_eq!(statuses, ["requested", "scheduled", "running", "succeeded"]);
    // Revisions step forward with each durable write
    assert!(observed.windows(2).all(|pair| pair[0].1 < pair[1].1));

    // Every published revision was already durable when it went out
    let stored = harness
        .store
        .get_liveaction(liveaction.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.revision >= observed.last().unwrap().1);
}

#[tokio::test]
async fn test_future_requests_wait_for_their_start_time() {
    let harness = harness(Arc::new(NoopRunner), SchedulerConfig::default()).await;
    harness
        .catalog
        .register(ActionRef::from("core.local"), Vec::new());

    let liveaction = harness
        .requests
        .request_at(
            ActionRef::from("core.local"),
            serde_json::json!({}),
            ExecutionContext::default(),
            Utc::now() + Duration::seconds(3600),
        )
        .await
        .unwrap();

    drive(&harness).await;

    let stored = harness
        .store
        .get_liveaction(liveaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LiveActionStatus::Requested);
    assert_eq!(harness.store.queue_len(), 1);
}

#[tokio::test]
async fn test_canceled_while_queued_drops_the_entry() {
    let harness = harness(Arc::new(NoopRunner), SchedulerConfig::default()).await;
    harness
        .catalog
        .register(ActionRef::from("core.local"), Vec::new());

    let liveaction = harness
        .requests
        .request(
            ActionRef::from("core.local"),
            serde_json::json!({}),
            ExecutionContext::default(),
        )
        .await
        .unwrap();
    harness.coordinator.cancel(liveaction.id).await.unwrap();

    drive(&harness).await;

    let stored = harness
        .store
        .get_liveaction(liveaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LiveActionStatus::Canceled);
    assert_eq!(harness.store.queue_len(), 0);
}
