//! Scheduler service lifecycle.
//!
//! One service instance runs two loops: the poll loop, which claims at most
//! one entry per tick and dispatches its resolution onto a bounded worker
//! pool, and the GC loop, which sweeps expired claims on its own timer.
//! The poll/claim step stays serialized within the instance to preserve the
//! single-claim guarantee; only resolution work fans out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::handler::{ResolutionOutcome, ScheduleResolver};
use super::queue::ExecutionQueue;
use crate::config::SchedulerConfig;
use crate::error::Result;

/// Monotonic counters exposed for monitoring and tests.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Entries successfully claimed by this instance.
    pub claims_won: AtomicU64,
    /// Resolutions that produced a terminal scheduling decision.
    pub resolved: AtomicU64,
    /// Resolutions that ended in a revision conflict and were retried later.
    pub retried: AtomicU64,
    /// Claims reclaimed by garbage collection.
    pub gc_reclaimed: AtomicU64,
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.claims_won.load(Ordering::Relaxed),
            self.resolved.load(Ordering::Relaxed),
            self.retried.load(Ordering::Relaxed),
            self.gc_reclaimed.load(Ordering::Relaxed),
        )
    }
}

/// Timer-driven scheduler instance.
pub struct SchedulerService {
    queue: Arc<ExecutionQueue>,
    resolver: Arc<ScheduleResolver>,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn new(
        queue: Arc<ExecutionQueue>,
        resolver: Arc<ScheduleResolver>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            resolver,
            config,
            metrics: Arc::new(SchedulerMetrics::default()),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }

    /// Start the poll and GC loops.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            gc_interval_secs = self.config.gc_interval_secs,
            pool_size = self.config.resolution_pool_size,
            "🚀 SCHEDULER: Starting service loops"
        );

        let mut handles = self.handles.lock().await;
        handles.push(self.spawn_poll_loop());
        handles.push(self.spawn_gc_loop());
    }

    /// Signal shutdown and wait for both loops to exit. In-flight
    /// resolutions complete; unresolved claims are recovered by GC on the
    /// next instance.
    pub async fn stop(&self) {
        info!("🛑 SCHEDULER: Stopping service loops");
        let _ = self.shutdown.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let resolver = self.resolver.clone();
        let metrics = self.metrics.clone();
        let pool = Arc::new(Semaphore::new(self.config.resolution_pool_size));
        let poll_interval = self.config.poll_interval();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        debug!("Poll loop shutting down");
                        return;
                    }
                }

                // Claiming stays serialized here; only resolution fans out.
                let entry = match queue.claim_next().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => continue,
                    Err(e) => {
                        error!(error = %e, "Claim attempt failed");
                        continue;
                    }
                };
                metrics.claims_won.fetch_add(1, Ordering::Relaxed);

                // Bounded pool: a slow policy evaluation for one entry must
                // not block the poll loop or other resolutions.
                let permit = match pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let resolver = resolver.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    match resolver.resolve(entry).await {
                        Ok(ResolutionOutcome::Retry) => {
                            metrics.retried.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {
                            metrics.resolved.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            error!(error = %e, "Entry resolution failed");
                        }
                    }
                });
            }
        })
    }

    fn spawn_gc_loop(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let metrics = self.metrics.clone();
        let gc_interval = self.config.gc_interval();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gc_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        debug!("GC loop shutting down");
                        return;
                    }
                }

                match queue.garbage_collect().await {
                    Ok(reclaimed) if reclaimed > 0 => {
                        metrics
                            .gc_reclaimed
                            .fetch_add(reclaimed as u64, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "GC sweep failed"),
                }
            }
        })
    }
}

/// Convenience: run a single claim/resolve round outside the timer loops.
/// Used by tests and by embedders that drive scheduling manually.
pub async fn run_one_tick(
    queue: &ExecutionQueue,
    resolver: &ScheduleResolver,
) -> Result<Option<ResolutionOutcome>> {
    match queue.claim_next().await? {
        Some(entry) => Ok(Some(resolver.resolve(entry).await?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StatusEventPublisher;
    use crate::model::{ActionExecution, ActionRef, ExecutionContext, LiveAction, LiveActionStatus};
    use crate::policy::PolicyRegistry;
    use crate::store::{ExecutionStore, InMemoryStore};
    use chrono::Utc;
    use serde_json::json;

    async fn service_fixture(store: Arc<InMemoryStore>) -> SchedulerService {
        let config = SchedulerConfig {
            poll_interval_ms: 10,
            gc_interval_secs: 1,
            ..SchedulerConfig::default()
        };
        let queue = Arc::new(ExecutionQueue::new(store.clone(), config.clone()));
        let policies = Arc::new(PolicyRegistry::with_builtin_drivers(store.clone()).await);
        let resolver = Arc::new(ScheduleResolver::new(
            store,
            queue.clone(),
            policies,
            StatusEventPublisher::default(),
            config.clone(),
        ));
        SchedulerService::new(queue, resolver, config)
    }

    #[tokio::test]
    async fn test_service_schedules_backlog_and_stops() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_fixture(store.clone()).await;

        let liveaction = LiveAction::new(
            ActionRef::from("core.local"),
            json!({}),
            ExecutionContext::default(),
        );
        let liveaction = store.insert_liveaction(liveaction).await.unwrap();
        store
            .insert_execution(ActionExecution::for_liveaction(&liveaction, None))
            .await
            .unwrap();
        store
            .insert_queue_entry(crate::model::ExecutionQueueEntry::new(
                liveaction.id,
                Utc::now(),
            ))
            .await
            .unwrap();

        service.start().await;

        // Give the poll loop a few ticks
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let stored = store.get_liveaction(liveaction.id).await.unwrap().unwrap();
            if stored.status == LiveActionStatus::Scheduled {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "execution was never scheduled"
            );
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        service.stop().await;
        let (claims, resolved, _, _) = service.metrics().snapshot();
        assert_eq!(claims, 1);
        assert_eq!(resolved, 1);
    }
}
