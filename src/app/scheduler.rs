//! Background loops driving the engine
//!
//! Runs the periodic jobs a deployment needs besides serving searches:
//! draining the batch queue, warming popular queries and sweeping abandoned
//! in-flight claims. Every loop stops on a broadcast shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::app::engine::JobSearchEngine;
use crate::constants::{batch, scheduler};
use crate::errors::BatchError;

/// Intervals for the background loops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub batch_interval: Duration,
    pub warm_interval: Duration,
    pub cleanup_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_interval: batch::DEFAULT_INTERVAL,
            warm_interval: scheduler::WARM_INTERVAL,
            cleanup_interval: scheduler::CLEANUP_INTERVAL,
            shutdown_timeout: scheduler::TASK_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Owner of the running background tasks
pub struct Scheduler {
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Vec::new(),
            shutdown_tx,
            config,
        }
    }

    /// Start every loop for `engine`
    pub fn start(engine: Arc<JobSearchEngine>, config: SchedulerConfig) -> Self {
        let mut scheduler = Self::new(config);
        scheduler.start_batch_task(Arc::clone(&engine));
        scheduler.start_warm_task(Arc::clone(&engine));
        scheduler.start_cleanup_task(engine);
        info!(
            "Scheduler started: batch every {:?}, warming every {:?}, cleanup every {:?}",
            scheduler.config.batch_interval,
            scheduler.config.warm_interval,
            scheduler.config.cleanup_interval
        );
        scheduler
    }

    /// Drain the batch queue on every tick
    pub fn start_batch_task(&mut self, engine: Arc<JobSearchEngine>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.batch_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match engine.execute_batch().await {
                            Ok(summary) if summary.processed > 0 => {
                                info!("Scheduled batch cycle: {}", summary);
                            }
                            Ok(_) => debug!("Scheduled batch cycle found nothing to do"),
                            Err(BatchError::CycleInProgress { holder }) => {
                                debug!("Skipping batch cycle, {} is draining", holder);
                            }
                            Err(e) => error!("Scheduled batch cycle failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Batch task received shutdown signal");
                        break;
                    }
                }
            }
        }));
    }

    /// Warm the configured popular queries on every tick
    pub fn start_warm_task(&mut self, engine: Arc<JobSearchEngine>) {
        if engine.config().popular_queries.is_empty() {
            debug!("No popular queries configured, cache warming disabled");
            return;
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.warm_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let summary = engine.warm_popular().await;
                        if summary.failed > 0 {
                            warn!("{} of {} popular queries could not be warmed", summary.failed, summary.attempted);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Warming task received shutdown signal");
                        break;
                    }
                }
            }
        }));
    }

    /// Sweep expired in-flight claims on every tick
    pub fn start_cleanup_task(&mut self, engine: Arc<JobSearchEngine>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.cleanup_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match engine.cleanup_stale_claims().await {
                            Ok(0) => {}
                            Ok(removed) => info!("Cleaned up {} stale in-flight claims", removed),
                            Err(e) => warn!("Claim cleanup failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cleanup task received shutdown signal");
                        break;
                    }
                }
            }
        }));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every loop and wait for it, bounded by the shutdown timeout
    pub async fn shutdown(self) {
        debug!("Initiating scheduler shutdown");
        let _ = self.shutdown_tx.send(());

        for task in self.tasks {
            if tokio::time::timeout(self.config.shutdown_timeout, task)
                .await
                .is_err()
            {
                warn!(
                    "Background task shutdown timed out after {:?}",
                    self.config.shutdown_timeout
                );
            }
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::engine::{EngineConfig, SearchFilters};
    use crate::app::sources::{SimulatedSource, SourceRegistry};
    use crate::app::store::InMemoryStore;
    use crate::app::warmer::PopularQuery;

    fn engine(paid: Arc<SimulatedSource>, popular: Vec<PopularQuery>) -> Arc<JobSearchEngine> {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(SimulatedSource::new("free"))).unwrap();
        registry.register(paid).unwrap();
        let config = EngineConfig {
            popular_queries: popular,
            ..Default::default()
        };
        Arc::new(JobSearchEngine::new(Arc::new(InMemoryStore::new()), registry, config).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_loop_drains_queue() {
        let paid = Arc::new(SimulatedSource::new("paid").with_quota_constrained(true));
        let engine = engine(Arc::clone(&paid), Vec::new());
        let filters = SearchFilters::default().with_source("paid");
        assert!(engine.search(&["kotlin"], "", &filters, 10).await.meta.queued);

        let scheduler = Scheduler::start(
            Arc::clone(&engine),
            SchedulerConfig {
                batch_interval: Duration::from_secs(60),
                ..Default::default()
            },
        );
        assert_eq!(scheduler.task_count(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(paid.call_count(), 1);
        assert!(engine.search(&["kotlin"], "", &filters, 10).await.meta.cache_hit);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_loop_runs_when_configured() {
        let paid = Arc::new(SimulatedSource::new("paid").with_quota_constrained(true));
        let engine = engine(paid, vec![PopularQuery::new(&["swift"], "")]);

        let scheduler = Scheduler::start(Arc::clone(&engine), SchedulerConfig::default());
        assert_eq!(scheduler.task_count(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let response = engine.search(&["swift"], "", &SearchFilters::default(), 5).await;
        assert!(response.meta.cache_hit);

        scheduler.shutdown().await;
    }
}
