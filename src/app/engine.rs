//! The job search engine
//!
//! [`JobSearchEngine`] wires the shared store, rate limiter, source registry,
//! aggregator, cache layer and batch queue together behind one `search` call.
//! A search never fails: upstream, store and coalescing problems degrade the
//! response (fewer sources, no cache) and are reported in its metadata.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::app::aggregator::{AggregateMeta, Aggregator, AggregatorConfig};
use crate::app::batch::{BatchConfig, BatchQueueManager, BatchSummary, Priority, QueuedRequest};
use crate::app::cache::{CacheConfig, CacheLayer};
use crate::app::fingerprint::SearchQuery;
use crate::app::models::{JobResult, JobType};
use crate::app::sources::SourceRegistry;
use crate::app::rate_limiter::RateLimiter;
use crate::app::stats::{Counter, EngineStats};
use crate::app::store::StoreHandle;
use crate::app::warmer::{CacheWarmer, PopularQuery, WarmSummary};
use crate::constants::limits;
use crate::errors::{AppError, BatchError, BatchResult, CacheError, CacheResult, StoreResult};

/// Post-filters applied to cached payloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict the search to one source
    pub source: Option<String>,
    pub remote_only: bool,
    pub job_type: Option<JobType>,
    pub min_salary: Option<i64>,
}

impl SearchFilters {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn remote_only(mut self) -> Self {
        self.remote_only = true;
        self
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_min_salary(mut self, min_salary: i64) -> Self {
        self.min_salary = Some(min_salary);
        self
    }

    fn matches(&self, job: &JobResult) -> bool {
        (!self.remote_only || job.remote)
            && self.job_type.map_or(true, |t| job.job_type == t)
            && self.min_salary.map_or(true, |min| job.meets_salary(min))
    }

    /// Keep the listings that pass every filter, preserving order
    pub fn apply(&self, jobs: Vec<JobResult>) -> Vec<JobResult> {
        jobs.into_iter().filter(|job| self.matches(job)).collect()
    }
}

/// Degradation metadata returned with every search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub sources_queried: usize,
    pub sources_succeeded: usize,
    pub cache_hit: bool,
    /// Served by joining another caller's in-flight fetch
    pub coalesced: bool,
    pub deduped_count: usize,
    pub latency_ms: u64,
    /// The query was deferred to the batch queue
    pub queued: bool,
    pub failed_sources: Vec<String>,
}

/// Listings plus metadata for one search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub jobs: Vec<JobResult>,
    pub meta: ResponseMeta,
}

/// Runtime configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub aggregator: AggregatorConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    /// Rate-limit window shared by every source
    pub rate_limit_window: Duration,
    /// Requests per window for sources without their own limit
    pub default_rate_limit: u32,
    pub popular_queries: Vec<PopularQuery>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            rate_limit_window: limits::RATE_LIMIT_WINDOW,
            default_rate_limit: limits::DEFAULT_REQUESTS_PER_MINUTE,
            popular_queries: Vec::new(),
        }
    }
}

type MetaSlot = Arc<Mutex<Option<AggregateMeta>>>;

/// Entry point for searching across every registered source
#[derive(Debug, Clone)]
pub struct JobSearchEngine {
    registry: Arc<SourceRegistry>,
    limiter: Arc<RateLimiter>,
    aggregator: Arc<Aggregator>,
    cache: CacheLayer,
    batch: BatchQueueManager,
    warmer: CacheWarmer,
    config: EngineConfig,
}

impl JobSearchEngine {
    /// Build the engine over a shared store and a populated registry
    pub fn new(
        store: StoreHandle,
        registry: SourceRegistry,
        config: EngineConfig,
    ) -> Result<Self, AppError> {
        let limiter = registry.build_rate_limiter(
            store.clone(),
            config.rate_limit_window,
            config.default_rate_limit,
        )?;
        Self::with_rate_limiter(store, registry, limiter, config)
    }

    /// Build the engine with a preconfigured rate limiter
    pub fn with_rate_limiter(
        store: StoreHandle,
        registry: SourceRegistry,
        limiter: RateLimiter,
        config: EngineConfig,
    ) -> Result<Self, AppError> {
        let mut errors = Vec::new();
        if let Err(e) = config.cache.validate() {
            errors.push(format!("cache: {}", e));
        }
        if let Err(e) = config.batch.validate() {
            errors.push(format!("batch: {}", e));
        }
        if config.aggregator.source_timeout >= config.cache.claim_lease {
            errors.push(format!(
                "aggregator: source timeout ({:?}) must be shorter than the claim lease ({:?})",
                config.aggregator.source_timeout, config.cache.claim_lease
            ));
        }
        if config.aggregator.source_timeout >= config.batch.cycle_lock_ttl {
            errors.push(format!(
                "batch: cycle lock ({:?}) must outlast the source timeout ({:?})",
                config.batch.cycle_lock_ttl, config.aggregator.source_timeout
            ));
        }
        if !errors.is_empty() {
            return Err(crate::errors::ConfigError::ValidationFailed { errors }.into());
        }

        let registry = Arc::new(registry);
        let limiter = Arc::new(limiter);
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&registry),
            Arc::clone(&limiter),
            config.aggregator.clone(),
        ));
        let cache = CacheLayer::new(store.clone(), config.cache.clone());
        let batch = BatchQueueManager::new(
            store,
            cache.clone(),
            Arc::clone(&limiter),
            config.batch.clone(),
        );
        let warmer = CacheWarmer::new(cache.clone());

        info!(
            "Search engine ready with {} sources ({} on the request path)",
            registry.len(),
            registry.fan_out_adapters().len()
        );

        Ok(Self {
            registry,
            limiter,
            aggregator,
            cache,
            batch,
            warmer,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn batch(&self) -> &BatchQueueManager {
        &self.batch
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Search every applicable source, served through the cache
    ///
    /// A search restricted to one quota-constrained source is answered from
    /// the batch results if present, and queued otherwise. Every other search
    /// reads through the cache, joining any identical fetch already in flight.
    ///
    /// # Arguments
    ///
    /// * `keywords` - Search terms; order and case do not matter
    /// * `location` - Location filter, empty for anywhere
    /// * `filters` - Source restriction and post-filters applied to the payload
    /// * `limit` - Maximum listings returned
    ///
    /// # Returns
    ///
    /// Always a `SearchResponse`. Failed sources, store outages and queued
    /// requests show up in its `meta` rather than as errors.
    pub async fn search<S: AsRef<str>>(
        &self,
        keywords: &[S],
        location: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> SearchResponse {
        let started = Instant::now();
        self.cache.stats().incr(Counter::TotalRequests, 1).await;

        let mut query = SearchQuery::new(keywords, location);
        if let Some(source) = filters.source.as_deref() {
            query = query.with_source(source.trim().to_lowercase());
            if self.registry.is_quota_constrained(source) {
                return self
                    .search_quota_source(query, source, filters, limit, started)
                    .await;
            }
        }

        if self.aggregator.adapters_for(&query).is_empty() {
            warn!("No sources available for [{}]", query.keyword_string());
            return SearchResponse {
                meta: ResponseMeta {
                    latency_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                },
                ..Default::default()
            };
        }

        let fingerprint = query.fingerprint();
        let slot: MetaSlot = Arc::new(Mutex::new(None));
        let fetch = self.fan_out(query, Some(Arc::clone(&slot)));
        let outcome = self
            .cache
            .get_or_fetch(fingerprint, self.config.cache.aggregate_ttl, move || fetch)
            .await;
        let fan_out_meta = slot.lock().unwrap_or_else(|p| p.into_inner()).take();

        let mut meta = ResponseMeta::default();
        if let Some(aggregate) = fan_out_meta {
            meta.sources_queried = aggregate.sources_queried;
            meta.sources_succeeded = aggregate.sources_succeeded;
            meta.deduped_count = aggregate.deduped_count;
            meta.failed_sources = aggregate.failed_sources;
        }

        let jobs = match outcome {
            Ok(result) => {
                meta.cache_hit = result.cache_hit;
                meta.coalesced = result.coalesced;
                if result.cache_hit {
                    self.cache.stats().incr(Counter::CachedResponses, 1).await;
                }
                result.jobs
            }
            Err(e) => {
                warn!("Search for {} degraded to an empty result: {}", fingerprint, e);
                Vec::new()
            }
        };

        let mut jobs = filters.apply(jobs);
        jobs.truncate(limit);
        meta.latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Search {} answered with {} jobs in {}ms (cache hit: {})",
            fingerprint,
            jobs.len(),
            meta.latency_ms,
            meta.cache_hit
        );
        SearchResponse { jobs, meta }
    }

    /// Quota-constrained sources are served from batch results or queued
    async fn search_quota_source(
        &self,
        query: SearchQuery,
        source: &str,
        filters: &SearchFilters,
        limit: usize,
        started: Instant,
    ) -> SearchResponse {
        let mut meta = ResponseMeta::default();
        let jobs = match self
            .batch
            .get_cached_results(&query.keywords, &query.location, source)
            .await
        {
            Some(jobs) => {
                meta.cache_hit = true;
                self.cache.stats().incr(Counter::CachedResponses, 1).await;
                jobs
            }
            None => {
                match self
                    .batch
                    .queue_request(&query.keywords, &query.location, source, Priority::Normal.value())
                    .await
                {
                    Ok(fingerprint) => debug!("Deferred {} to the batch queue", fingerprint),
                    Err(e) => error!("Could not queue request for {}: {}", source, e),
                }
                meta.queued = true;
                Vec::new()
            }
        };

        let mut jobs = filters.apply(jobs);
        jobs.truncate(limit);
        meta.latency_ms = started.elapsed().as_millis() as u64;
        SearchResponse { jobs, meta }
    }

    /// Fan-out future used as the cache fetch
    ///
    /// Fails when every queried source failed so the empty result is not
    /// cached.
    fn fan_out(
        &self,
        query: SearchQuery,
        slot: Option<MetaSlot>,
    ) -> impl Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static {
        let aggregator = Arc::clone(&self.aggregator);
        let per_source = self.config.aggregator.limit_per_source;
        let max_results = self.config.aggregator.max_results;

        async move {
            let result = aggregator.search_all(&query, per_source, max_results).await;
            let all_failed =
                result.meta.sources_queried > 0 && result.meta.sources_succeeded == 0;
            let queried = result.meta.sources_queried;
            if let Some(slot) = slot {
                *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(result.meta);
            }

            if all_failed {
                Err(CacheError::UpstreamFailed {
                    fingerprint: query.fingerprint().to_string(),
                    reason: format!("all {} sources failed", queried),
                })
            } else {
                Ok(result.jobs)
            }
        }
    }

    /// Drain the batch queue once
    ///
    /// Each queued request is bounded by the per-source timeout, which is
    /// shorter than the cycle lock, so a renewed lock always outlives the
    /// fetch in progress.
    pub async fn execute_batch(&self) -> BatchResult<BatchSummary> {
        let registry = Arc::clone(&self.registry);
        let per_source = self.config.aggregator.limit_per_source;
        let timeout = self.config.aggregator.source_timeout;

        self.batch
            .execute_batch_fetch(
                move |entry: QueuedRequest| {
                    let registry = Arc::clone(&registry);
                    async move {
                        let adapter = registry.get(&entry.source).ok_or_else(|| {
                            BatchError::UnknownSource {
                                source_name: entry.source.clone(),
                            }
                        })?;
                        match tokio::time::timeout(
                            timeout,
                            adapter.search(&entry.query(), 1, per_source),
                        )
                        .await
                        {
                            Ok(Ok(jobs)) => Ok(jobs),
                            Ok(Err(e)) => Err(BatchError::FetchFailed {
                                fingerprint: entry.fingerprint.to_string(),
                                reason: e.to_string(),
                            }),
                            Err(_) => Err(BatchError::FetchFailed {
                                fingerprint: entry.fingerprint.to_string(),
                                reason: format!("timed out after {:?}", timeout),
                            }),
                        }
                    }
                },
                self.config.batch.max_requests,
            )
            .await
    }

    /// Refresh the configured popular queries
    pub async fn warm_popular(&self) -> WarmSummary {
        self.warm(&self.config.popular_queries).await
    }

    /// Refresh an explicit list of queries
    pub async fn warm(&self, queries: &[PopularQuery]) -> WarmSummary {
        self.warmer
            .warm_cache(queries, |query| self.fan_out(query, None))
            .await
    }

    /// Remove abandoned in-flight claims
    pub async fn cleanup_stale_claims(&self) -> CacheResult<usize> {
        self.cache.cleanup_stale_claims().await
    }

    /// Snapshot of the shared counters
    pub async fn stats(&self) -> StoreResult<EngineStats> {
        self.cache.stats().snapshot().await
    }
}
