//! Concurrent fan-out across source adapters
//!
//! One search is sent to every selected adapter at once, bounded by a
//! semaphore. Each adapter call runs in its own task with its own timeout,
//! and a panic inside an adapter is caught and reported as a failure of that
//! source only. Results are merged in registry order, deduplicated (first
//! seen wins), sorted newest first and truncated.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::fingerprint::SearchQuery;
use crate::app::models::{dedup_first_seen, sort_newest_first, JobResult};
use crate::app::rate_limiter::RateLimiter;
use crate::app::sources::{SearchMeta, SearchOutcome, SourceAdapter, SourceRegistry};
use crate::constants::aggregator as defaults;

/// Aggregator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Maximum simultaneous outbound source calls
    pub max_concurrency: usize,
    /// Timeout applied to each source call
    pub source_timeout: Duration,
    /// Results requested from each source
    pub limit_per_source: usize,
    /// Upper bound on merged results
    pub max_results: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: defaults::DEFAULT_MAX_CONCURRENCY,
            source_timeout: defaults::DEFAULT_SOURCE_TIMEOUT,
            limit_per_source: defaults::DEFAULT_LIMIT_PER_SOURCE,
            max_results: defaults::DEFAULT_MAX_RESULTS,
        }
    }
}

impl AggregatorConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_limit_per_source(mut self, limit: usize) -> Self {
        self.limit_per_source = limit.max(1);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }
}

/// Fan-out bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMeta {
    pub sources_queried: usize,
    pub sources_succeeded: usize,
    /// Listings dropped as cross-source duplicates
    pub deduped_count: usize,
    pub failed_sources: Vec<String>,
    /// Per-source call metadata
    pub per_source: BTreeMap<String, SearchMeta>,
}

/// Merged results of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub jobs: Vec<JobResult>,
    pub meta: AggregateMeta,
}

/// Fans a query out to source adapters and merges the answers
#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: Arc<SourceRegistry>,
    limiter: Arc<RateLimiter>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        limiter: Arc<RateLimiter>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            registry,
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Adapters a query is sent to: the filtered source, or every
    /// non-quota source
    pub fn adapters_for(&self, query: &SearchQuery) -> Vec<Arc<dyn SourceAdapter>> {
        match query.source.as_deref() {
            Some(name) => match self.registry.get(name) {
                Some(adapter) => vec![adapter],
                None => {
                    warn!("Search filtered on unregistered source {}", name);
                    Vec::new()
                }
            },
            None => self.registry.fan_out_adapters(),
        }
    }

    /// Search every selected adapter concurrently
    pub async fn search_all(
        &self,
        query: &SearchQuery,
        limit_per_source: usize,
        limit: usize,
    ) -> AggregateResult {
        let adapters = self.adapters_for(query);
        self.search_adapters(&adapters, query, limit_per_source, limit)
            .await
    }

    /// Search an explicit set of adapters concurrently
    pub async fn search_adapters(
        &self,
        adapters: &[Arc<dyn SourceAdapter>],
        query: &SearchQuery,
        limit_per_source: usize,
        limit: usize,
    ) -> AggregateResult {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, adapter) in adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let limiter = Arc::clone(&self.limiter);
            let semaphore = Arc::clone(&semaphore);
            let query = query.clone();
            let timeout = self.config.source_timeout;

            tasks.spawn(async move {
                let name = adapter.name().to_string();
                let outcome = run_source(
                    adapter,
                    limiter,
                    semaphore,
                    query,
                    limit_per_source,
                    timeout,
                )
                .await;
                (index, name, outcome)
            });
        }

        let mut slots: Vec<Option<(String, SearchOutcome)>> = vec![None; adapters.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, name, outcome)) => slots[index] = Some((name, outcome)),
                Err(e) => error!("Source task could not be joined: {}", e),
            }
        }

        let mut meta = AggregateMeta {
            sources_queried: adapters.len(),
            ..Default::default()
        };
        let mut merged = Vec::new();

        for (index, slot) in slots.into_iter().enumerate() {
            let Some((name, outcome)) = slot else {
                meta.failed_sources.push(adapters[index].name().to_string());
                continue;
            };
            if outcome.succeeded() {
                meta.sources_succeeded += 1;
            } else {
                meta.failed_sources.push(name.clone());
            }
            merged.extend(outcome.results);
            meta.per_source.insert(name, outcome.meta);
        }

        let (mut jobs, dropped) = dedup_first_seen(merged);
        sort_newest_first(&mut jobs);
        jobs.truncate(limit);
        meta.deduped_count = dropped;

        info!(
            "Fan-out for [{}] in {:?}: {}/{} sources, {} jobs ({} duplicates)",
            query.keyword_string(),
            query.location,
            meta.sources_succeeded,
            meta.sources_queried,
            jobs.len(),
            dropped
        );
        AggregateResult { jobs, meta }
    }
}

fn failed(message: String) -> SearchOutcome {
    SearchOutcome {
        results: Vec::new(),
        meta: SearchMeta {
            error: Some(message),
            ..Default::default()
        },
    }
}

async fn run_source(
    adapter: Arc<dyn SourceAdapter>,
    limiter: Arc<RateLimiter>,
    semaphore: Arc<Semaphore>,
    query: SearchQuery,
    limit_per_source: usize,
    timeout: Duration,
) -> SearchOutcome {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return failed("fan-out cancelled".to_string()),
    };

    let call = adapter.search_with_rate_limit(&limiter, &query, 1, limit_per_source);
    let guarded = AssertUnwindSafe(tokio::time::timeout(timeout, call)).catch_unwind();

    let outcome = match guarded.await {
        Ok(Ok(Ok(outcome))) => outcome,
        Ok(Ok(Err(e))) => {
            error!("{} is misconfigured: {}", adapter.name(), e);
            failed(e.to_string())
        }
        Ok(Err(_)) => {
            warn!("{} timed out after {:?}", adapter.name(), timeout);
            failed(format!("timed out after {} ms", timeout.as_millis()))
        }
        Err(_) => {
            error!("{} panicked during search", adapter.name());
            failed("adapter panicked".to_string())
        }
    };

    debug!(
        "{}: {} results, error = {:?}",
        adapter.name(),
        outcome.results.len(),
        outcome.meta.error
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sources::{SimulatedFailure, SimulatedSource};
    use crate::app::store::InMemoryStore;
    use chrono::{TimeZone, Utc};

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(
            RateLimiter::new(Arc::new(InMemoryStore::new()))
                .with_default_limit(1000)
                .unwrap(),
        )
    }

    fn aggregator(sources: Vec<Arc<SimulatedSource>>, config: AggregatorConfig) -> Aggregator {
        let mut registry = SourceRegistry::new();
        for source in sources {
            registry.register(source).unwrap();
        }
        Aggregator::new(Arc::new(registry), limiter(), config)
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let ok_a = Arc::new(SimulatedSource::new("a").with_result_count(3));
        let broken = Arc::new(SimulatedSource::new("b").with_failure(SimulatedFailure::Status(500)));
        let ok_c = Arc::new(SimulatedSource::new("c").with_result_count(2));
        let agg = aggregator(vec![ok_a, broken, ok_c], AggregatorConfig::default());

        let result = agg
            .search_all(&SearchQuery::new(&["rust"], "remote"), 10, 50)
            .await;
        assert_eq!(result.meta.sources_queried, 3);
        assert_eq!(result.meta.sources_succeeded, 2);
        assert_eq!(result.meta.failed_sources, vec!["b"]);
        assert_eq!(result.jobs.len(), 5);
    }

    #[tokio::test]
    async fn test_cross_source_duplicates_collapse() {
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut first = JobResult::new("Rust Engineer", "Ferris Inc", "a", "1", when);
        first.source = "a".to_string();
        let mut second = JobResult::new("rust  engineer", "FERRIS INC", "b", "2", when);
        second.source = "b".to_string();

        let agg = aggregator(
            vec![
                Arc::new(SimulatedSource::new("a").with_jobs(vec![first])),
                Arc::new(SimulatedSource::new("b").with_jobs(vec![second])),
            ],
            AggregatorConfig::default(),
        );

        let result = agg
            .search_all(&SearchQuery::new(&["rust"], ""), 10, 10)
            .await;
        assert_eq!(result.jobs.len(), 1);
        assert_eq!(result.jobs[0].source, "a");
        assert_eq!(result.meta.deduped_count, 1);
    }

    #[tokio::test]
    async fn test_sorted_and_truncated() {
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let agg = aggregator(
            vec![
                Arc::new(SimulatedSource::new("old").with_posted_base(old).with_result_count(4)),
                Arc::new(SimulatedSource::new("new").with_posted_base(new).with_result_count(4)),
            ],
            AggregatorConfig::default(),
        );

        let result = agg
            .search_all(&SearchQuery::new(&["go"], ""), 10, 5)
            .await;
        assert_eq!(result.jobs.len(), 5);
        assert!(result
            .jobs
            .windows(2)
            .all(|pair| pair[0].posted_date >= pair[1].posted_date));
        assert_eq!(result.jobs[0].source, "new");
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let agg = aggregator(
            vec![
                Arc::new(SimulatedSource::new("boom").with_failure(SimulatedFailure::Panic)),
                Arc::new(SimulatedSource::new("fine").with_result_count(1)),
            ],
            AggregatorConfig::default(),
        );

        let result = agg.search_all(&SearchQuery::new(&["x"], ""), 5, 5).await;
        assert_eq!(result.meta.sources_succeeded, 1);
        assert_eq!(result.meta.failed_sources, vec!["boom"]);
        assert_eq!(result.jobs.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let agg = aggregator(
            vec![
                Arc::new(SimulatedSource::new("stuck").with_failure(SimulatedFailure::Hang)),
                Arc::new(SimulatedSource::new("quick").with_result_count(2)),
            ],
            AggregatorConfig::default().with_source_timeout(Duration::from_secs(2)),
        );

        let result = agg.search_all(&SearchQuery::new(&["x"], ""), 5, 5).await;
        assert_eq!(result.meta.sources_succeeded, 1);
        assert!(result.meta.per_source["stuck"]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let sources: Vec<Arc<SimulatedSource>> = (0..6)
            .map(|i| {
                Arc::new(
                    SimulatedSource::new(format!("s{}", i))
                        .with_latency(Duration::from_millis(100)),
                )
            })
            .collect();
        let agg = aggregator(sources, AggregatorConfig::default().with_max_concurrency(2));

        let started = tokio::time::Instant::now();
        let result = agg.search_all(&SearchQuery::new(&["x"], ""), 1, 50).await;

        assert_eq!(result.meta.sources_succeeded, 6);
        // Six 100ms calls two at a time take three rounds
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_source_filter_selects_one_adapter() {
        let a = Arc::new(SimulatedSource::new("a"));
        let b = Arc::new(SimulatedSource::new("b"));
        let agg = aggregator(vec![a.clone(), b.clone()], AggregatorConfig::default());

        let query = SearchQuery::new(&["x"], "").with_source("b");
        let result = agg.search_all(&query, 5, 5).await;
        assert_eq!(result.meta.sources_queried, 1);
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 1);
    }
}
