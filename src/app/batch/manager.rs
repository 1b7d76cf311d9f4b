//! Deduplicating batch queue for quota-constrained sources
//!
//! Identical queries from many callers collapse into one queue slot keyed by
//! fingerprint. A drain cycle, run by one process at a time, executes the
//! pending slots against their sources and caches the results for the batch
//! window, so every later caller is served from the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::config::BatchConfig;
use super::types::{BatchSummary, QueuedRequest};
use crate::app::cache::CacheLayer;
use crate::app::fingerprint::{QueryFingerprint, SearchQuery};
use crate::app::models::JobResult;
use crate::app::rate_limiter::RateLimiter;
use crate::app::stats::Counter;
use crate::app::store::StoreHandle;
use crate::constants::batch::{ATTEMPTS_KEY, DEDUP_KEY, LOCK_KEY, QUEUE_KEY, SEQUENCE_KEY};
use crate::errors::{BatchError, BatchResult, StoreError};

/// Queue of pending requests against quota-constrained sources
#[derive(Debug, Clone)]
pub struct BatchQueueManager {
    store: StoreHandle,
    cache: CacheLayer,
    limiter: Arc<RateLimiter>,
    config: BatchConfig,
}

impl BatchQueueManager {
    pub fn new(
        store: StoreHandle,
        cache: CacheLayer,
        limiter: Arc<RateLimiter>,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            cache,
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Queue a query, or fold it into an identical pending one
    ///
    /// Returns the fingerprint of the slot the request landed in.
    pub async fn queue_request<S: AsRef<str>>(
        &self,
        keywords: &[S],
        location: &str,
        source: &str,
        priority: u32,
    ) -> BatchResult<QueryFingerprint> {
        let query = SearchQuery::new(keywords, location).with_source(source.trim().to_lowercase());
        let fingerprint = query.fingerprint();
        let field = fingerprint.to_hex();

        let sequence = self.store.incr(SEQUENCE_KEY, 1, None).await?;
        let entry = QueuedRequest::new(&query, priority, sequence.max(0) as u64);
        let payload = serde_json::to_string(&entry).map_err(StoreError::from)?;

        let (created, count) = self
            .store
            .hset_nx_counted(QUEUE_KEY, &field, &payload, DEDUP_KEY)
            .await?;

        if created {
            info!(
                "Queued [{}] in {:?} for {} (priority {})",
                query.keyword_string(),
                query.location,
                source,
                priority
            );
        } else {
            self.cache
                .stats()
                .incr(Counter::DeduplicatedRequests, 1)
                .await;
            debug!("Folded repeat request into {} (now {} requests)", fingerprint, count);
        }
        Ok(fingerprint)
    }

    /// Results cached for a query by an earlier cycle, if any
    ///
    /// A store outage reads as a miss.
    pub async fn get_cached_results<S: AsRef<str>>(
        &self,
        keywords: &[S],
        location: &str,
        source: &str,
    ) -> Option<Vec<JobResult>> {
        let fingerprint = QueryFingerprint::compute(keywords, location, Some(source));
        match self.cache.get(&fingerprint).await {
            Ok(entry) => entry.map(|e| e.jobs),
            Err(e) => {
                error!("Could not read batch results for {}: {}", fingerprint, e);
                None
            }
        }
    }

    /// One pending entry
    pub async fn get_request(
        &self,
        fingerprint: &QueryFingerprint,
    ) -> BatchResult<Option<QueuedRequest>> {
        let field = fingerprint.to_hex();
        let Some(raw) = self.store.hget(QUEUE_KEY, &field).await? else {
            return Ok(None);
        };
        let mut entry: QueuedRequest = serde_json::from_str(&raw).map_err(StoreError::from)?;
        entry.dedup_count = read_counter(self.store.hget(DEDUP_KEY, &field).await?, 1);
        entry.attempts = read_counter(self.store.hget(ATTEMPTS_KEY, &field).await?, 0) as u32;
        Ok(Some(entry))
    }

    /// Every pending entry in execution order
    pub async fn pending(&self) -> BatchResult<Vec<QueuedRequest>> {
        let dedup: HashMap<String, String> =
            self.store.hgetall(DEDUP_KEY).await?.into_iter().collect();
        let attempts: HashMap<String, String> =
            self.store.hgetall(ATTEMPTS_KEY).await?.into_iter().collect();

        let mut entries = Vec::new();
        for (field, raw) in self.store.hgetall(QUEUE_KEY).await? {
            match serde_json::from_str::<QueuedRequest>(&raw) {
                Ok(mut entry) => {
                    entry.dedup_count = read_counter(dedup.get(&field).cloned(), 1);
                    entry.attempts = read_counter(attempts.get(&field).cloned(), 0) as u32;
                    entries.push(entry);
                }
                Err(e) => {
                    warn!("Removing unreadable queue entry {}: {}", field, e);
                    self.remove_field(&field).await?;
                }
            }
        }

        entries.sort_by_key(|e| e.order_key());
        Ok(entries)
    }

    pub async fn queue_len(&self) -> BatchResult<usize> {
        Ok(self.store.hgetall(QUEUE_KEY).await?.len())
    }

    /// Drop every pending entry; returns how many were removed
    pub async fn clear(&self) -> BatchResult<usize> {
        let removed = self.queue_len().await?;
        for key in [QUEUE_KEY, DEDUP_KEY, ATTEMPTS_KEY] {
            self.store.delete(key).await?;
        }
        info!("Cleared {} queued requests", removed);
        Ok(removed)
    }

    async fn remove_field(&self, field: &str) -> BatchResult<()> {
        self.store.hdel(QUEUE_KEY, field).await?;
        self.store.hdel(DEDUP_KEY, field).await?;
        self.store.hdel(ATTEMPTS_KEY, field).await?;
        Ok(())
    }

    /// Drain up to `max_requests` entries through `fetch_fn`
    ///
    /// Only one process drains at a time. The cycle lock is renewed before
    /// every entry, and the cycle stops early if the lock was lost, so a
    /// `fetch_fn` bounded by less than `cycle_lock_ttl` never runs alongside
    /// another process's cycle.
    ///
    /// # Arguments
    ///
    /// * `fetch_fn` - Executes one queued request against its source
    /// * `max_requests` - Upper bound on entries taken from the queue
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::CycleInProgress`] if another process holds the
    /// cycle lock, or a store error if the queue cannot be read. Failures of
    /// individual entries never abort the cycle; they are counted in the
    /// summary and retried until `max_attempts`.
    pub async fn execute_batch_fetch<F, Fut>(
        &self,
        fetch_fn: F,
        max_requests: usize,
    ) -> BatchResult<BatchSummary>
    where
        F: Fn(QueuedRequest) -> Fut,
        Fut: Future<Output = BatchResult<Vec<JobResult>>>,
    {
        let token = format!("{}:{:016x}", self.cache.instance_id(), fastrand::u64(..));
        if !self
            .store
            .set_nx(LOCK_KEY, &token, Some(self.config.cycle_lock_ttl))
            .await?
        {
            let holder = self
                .store
                .get(LOCK_KEY)
                .await?
                .unwrap_or_else(|| "unknown".to_string());
            return Err(BatchError::CycleInProgress { holder });
        }

        let result = self.drain(&fetch_fn, max_requests, &token).await;

        if let Err(e) = self.store.delete_if_eq(LOCK_KEY, &token).await {
            warn!("Could not release batch cycle lock: {}", e);
        }
        self.cache.stats().incr(Counter::BatchExecutions, 1).await;
        result
    }

    /// Extend the cycle lock if this process still holds it
    async fn renew_lock(&self, token: &str) -> bool {
        match self
            .store
            .expire_if_eq(LOCK_KEY, token, self.config.cycle_lock_ttl)
            .await
        {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!("Could not renew batch cycle lock: {}", e);
                false
            }
        }
    }

    async fn drain<F, Fut>(
        &self,
        fetch_fn: &F,
        max_requests: usize,
        token: &str,
    ) -> BatchResult<BatchSummary>
    where
        F: Fn(QueuedRequest) -> Fut,
        Fut: Future<Output = BatchResult<Vec<JobResult>>>,
    {
        let started = Instant::now();
        let mut summary = BatchSummary::default();
        let pending = self.pending().await?;
        info!(
            "Batch cycle starting: {} pending, executing up to {}",
            pending.len(),
            max_requests
        );

        let result_ttl = self.cache.config().ttl_for(true);

        for entry in pending.into_iter().take(max_requests) {
            if !self.renew_lock(token).await {
                warn!("Lost the batch cycle lock, stopping after {} entries", summary.processed);
                break;
            }
            summary.processed += 1;
            let field = entry.fingerprint.to_hex();

            // Another path may have cached this query since it was queued
            if let Ok(Some(_)) = self.cache.get(&entry.fingerprint).await {
                debug!("{} already cached, skipping upstream call", entry.fingerprint);
                self.remove_field(&field).await?;
                summary.succeeded += 1;
                summary.api_calls_saved += entry.dedup_count;
                continue;
            }

            if !self.limiter.is_allowed(&entry.source).await {
                debug!("{} rate limited, {} stays queued", entry.source, entry.fingerprint);
                summary.rate_limited += 1;
                continue;
            }

            let fingerprint = entry.fingerprint;
            let duplicates = entry.duplicates();
            let attempts_so_far = entry.attempts;

            let outcome = match fetch_fn(entry).await {
                Ok(jobs) => self
                    .cache
                    .put(&fingerprint, jobs, result_ttl)
                    .await
                    .map(|_| ())
                    .map_err(|e| BatchError::FetchFailed {
                        fingerprint: fingerprint.to_string(),
                        reason: format!("could not cache results: {}", e),
                    }),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.remove_field(&field).await?;
                    summary.succeeded += 1;
                    summary.deduplicated_requests += duplicates;
                    summary.api_calls_saved += duplicates;
                }
                Err(e) => {
                    summary.failed += 1;
                    let attempts = self.store.hincr(ATTEMPTS_KEY, &field, 1).await?;
                    if attempts >= self.config.max_attempts as i64 {
                        warn!(
                            "Dropping {} after {} failed attempts: {}",
                            fingerprint, attempts, e
                        );
                        self.remove_field(&field).await?;
                        summary.dropped += 1;
                    } else {
                        warn!(
                            "Batch fetch for {} failed (attempt {} of {}), keeping it queued: {}",
                            fingerprint,
                            attempts_so_far + 1,
                            self.config.max_attempts,
                            e
                        );
                    }
                }
            }
        }

        self.cache
            .stats()
            .incr(Counter::ApiCallsSaved, summary.api_calls_saved)
            .await;
        summary.remaining = self.queue_len().await?;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!("Batch cycle finished: {}", summary);
        Ok(summary)
    }
}

fn read_counter(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.parse::<i64>().ok())
        .map(|v| v.max(0) as u64)
        .unwrap_or(default)
}
