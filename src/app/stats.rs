//! Shared usage counters
//!
//! Counters live in the shared store under `jobs:stats:` so every process
//! contributes to the same totals. Increments are best-effort: a store
//! failure is logged and the request carries on.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::store::StoreHandle;
use crate::constants::stats::PREFIX;
use crate::errors::StoreResult;

/// Counters tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Every call to the engine's search
    TotalRequests,
    /// Searches answered from the cache
    CachedResponses,
    /// Repeat requests absorbed by the batch queue
    DeduplicatedRequests,
    /// Upstream calls avoided by batch deduplication
    ApiCallsSaved,
    /// Callers that joined another caller's in-flight fetch
    CoalescedRequests,
    /// Fetches actually sent upstream
    UpstreamFetches,
    /// Batch cycles executed
    BatchExecutions,
}

impl Counter {
    pub const ALL: [Counter; 7] = [
        Counter::TotalRequests,
        Counter::CachedResponses,
        Counter::DeduplicatedRequests,
        Counter::ApiCallsSaved,
        Counter::CoalescedRequests,
        Counter::UpstreamFetches,
        Counter::BatchExecutions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Counter::TotalRequests => "total_requests",
            Counter::CachedResponses => "cached_responses",
            Counter::DeduplicatedRequests => "deduplicated_requests",
            Counter::ApiCallsSaved => "api_calls_saved",
            Counter::CoalescedRequests => "coalesced_requests",
            Counter::UpstreamFetches => "upstream_fetches",
            Counter::BatchExecutions => "batch_executions",
        }
    }

    fn key(&self) -> String {
        format!("{}{}", PREFIX, self.name())
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_requests: u64,
    pub cached_responses: u64,
    pub deduplicated_requests: u64,
    pub api_calls_saved: u64,
    pub coalesced_requests: u64,
    pub upstream_fetches: u64,
    pub batch_executions: u64,
}

impl EngineStats {
    /// Fraction of requests answered from the cache
    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cached_responses as f64 / self.total_requests as f64
        }
    }

    fn set(&mut self, counter: Counter, value: u64) {
        match counter {
            Counter::TotalRequests => self.total_requests = value,
            Counter::CachedResponses => self.cached_responses = value,
            Counter::DeduplicatedRequests => self.deduplicated_requests = value,
            Counter::ApiCallsSaved => self.api_calls_saved = value,
            Counter::CoalescedRequests => self.coalesced_requests = value,
            Counter::UpstreamFetches => self.upstream_fetches = value,
            Counter::BatchExecutions => self.batch_executions = value,
        }
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total requests:        {}", self.total_requests)?;
        writeln!(
            f,
            "Cached responses:      {} ({:.1}% hit rate)",
            self.cached_responses,
            self.cache_hit_rate() * 100.0
        )?;
        writeln!(f, "Coalesced requests:    {}", self.coalesced_requests)?;
        writeln!(f, "Upstream fetches:      {}", self.upstream_fetches)?;
        writeln!(f, "Deduplicated requests: {}", self.deduplicated_requests)?;
        writeln!(f, "API calls saved:       {}", self.api_calls_saved)?;
        write!(f, "Batch executions:      {}", self.batch_executions)
    }
}

/// Handle for reading and bumping the shared counters
#[derive(Debug, Clone)]
pub struct Stats {
    store: StoreHandle,
}

impl Stats {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Add `by` to a counter, logging rather than failing on store errors
    pub async fn incr(&self, counter: Counter, by: u64) {
        if by == 0 {
            return;
        }
        if let Err(e) = self.store.incr(&counter.key(), by as i64, None).await {
            warn!("Could not update {} counter: {}", counter.name(), e);
        }
    }

    /// Current value of one counter
    pub async fn get(&self, counter: Counter) -> StoreResult<u64> {
        Ok(self
            .store
            .get(&counter.key())
            .await?
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0) as u64)
    }

    /// Read every counter
    pub async fn snapshot(&self) -> StoreResult<EngineStats> {
        let mut stats = EngineStats::default();
        for counter in Counter::ALL {
            stats.set(counter, self.get(counter).await?);
        }
        Ok(stats)
    }

    /// Zero every counter
    pub async fn reset(&self) -> StoreResult<()> {
        for counter in Counter::ALL {
            self.store.delete(&counter.key()).await?;
        }
        Ok(())
    }
}
