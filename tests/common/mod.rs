//! Shared wiring for the integration suites: the full scheduling and
//! orchestration stack over the in-memory store, with a pluggable leaf
//! runner.

use std::sync::Arc;

use conductor_core::config::{EventConfig, SchedulerConfig};
use conductor_core::events::StatusEventPublisher;
use conductor_core::policy::PolicyRegistry;
use conductor_core::registry::ActionCatalog;
use conductor_core::runner::ActionRunner;
use conductor_core::scheduler::{run_one_tick, ExecutionQueue, ScheduleResolver};
use conductor_core::services::{ExecutionCoordinator, ExecutionRequestService};
use conductor_core::store::InMemoryStore;
use conductor_core::workflow::{SimpleEvaluator, WorkflowEngine};

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub catalog: Arc<ActionCatalog>,
    pub queue: Arc<ExecutionQueue>,
    pub resolver: Arc<ScheduleResolver>,
    pub requests: Arc<ExecutionRequestService>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub publisher: StatusEventPublisher,
}

pub async fn harness(runner: Arc<dyn ActionRunner>, config: SchedulerConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let publisher = StatusEventPublisher::from_config(&EventConfig::default());
    let catalog = Arc::new(ActionCatalog::new());
    let queue = Arc::new(ExecutionQueue::new(store.clone(), config.clone()));
    let requests = Arc::new(ExecutionRequestService::new(
        store.clone(),
        queue.clone(),
        catalog.clone(),
        publisher.clone(),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        catalog.clone(),
        Arc::new(SimpleEvaluator),
        publisher.clone(),
        requests.clone(),
    ));
    let policies = Arc::new(PolicyRegistry::with_builtin_drivers(store.clone()).await);
    let coordinator = Arc::new(ExecutionCoordinator::new(
        store.clone(),
        publisher.clone(),
        policies.clone(),
        engine,
        runner,
    ));
    let resolver = Arc::new(
        ScheduleResolver::new(
            store.clone(),
            queue.clone(),
            policies,
            publisher.clone(),
            config,
        )
        .with_dispatcher(coordinator.clone()),
    );
    Harness {
        store,
        catalog,
        queue,
        resolver,
        requests,
        coordinator,
        publisher,
    }
}

/// Claim and resolve entries until the eligible backlog is empty.
pub async fn drive(harness: &Harness) {
    for _ in 0..100 {
        match run_one_tick(&harness.queue, &harness.resolver).await.unwrap() {
            Some(_) => continue,
            None => break,
        }
    }
}
