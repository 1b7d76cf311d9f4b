//! Upstream job sources
//!
//! A source adapter translates one upstream API into canonical
//! [`JobResult`]s. The set of adapters is closed: every variant is listed in
//! [`SourceKind`] and instantiated by the [`SourceRegistry`] from
//! configuration.
//!
//! The module is organized into:
//! - `config`: per-adapter HTTP client configuration
//! - `http`: HTTP operations with local smoothing and backoff
//! - `registry`: closed set of adapters built from configuration
//! - one module per upstream, plus `simulated` for tests and load simulation

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::fingerprint::SearchQuery;
use crate::app::models::JobResult;
use crate::app::rate_limiter::RateLimiter;
use crate::errors::SourceResult;

pub mod adzuna;
pub mod arbeitnow;
pub mod config;
pub mod http;
pub mod jsearch;
pub mod registry;
pub mod remotive;
pub mod simulated;
pub mod themuse;

pub use config::ClientConfig;
pub use http::HttpHandler;
pub use registry::{SourceKind, SourceRegistry, SourceSettings};
pub use simulated::{SimulatedFailure, SimulatedSource};

/// Per-call metadata reported alongside results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMeta {
    pub latency_ms: u64,
    /// Requests left in the source's current rate-limit window
    pub remaining_quota: u32,
    /// Set when the call failed and the results are empty
    pub error: Option<String>,
}

/// Results of one rate-limited source call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<JobResult>,
    pub meta: SearchMeta,
}

impl SearchOutcome {
    /// Whether the call completed without error
    pub fn succeeded(&self) -> bool {
        self.meta.error.is_none()
    }
}

/// Contract implemented by every upstream job source
#[async_trait]
pub trait SourceAdapter: Send + Sync + std::fmt::Debug {
    /// Stable source name used in keys, logs and results
    fn name(&self) -> &str;

    /// Requests per minute permitted by the upstream
    fn rate_limit(&self) -> u32;

    /// Whether the upstream has a tight paid quota; such sources are served
    /// through the batch queue
    fn is_quota_constrained(&self) -> bool {
        false
    }

    /// Search the upstream for `query`, returning at most `limit` listings
    async fn search(
        &self,
        query: &SearchQuery,
        page: u32,
        limit: usize,
    ) -> SourceResult<Vec<JobResult>>;

    /// Fetch a single listing by its upstream id
    ///
    /// Sources without a detail endpoint return `Ok(None)`.
    async fn fetch_by_id(&self, _external_id: &str) -> SourceResult<Option<JobResult>> {
        Ok(None)
    }

    /// Search behind the shared rate limiter, absorbing transient failures
    ///
    /// Waits for the source's window if needed, then calls
    /// [`SourceAdapter::search`]. Recoverable errors are logged and reported
    /// as an empty result with `meta.error` set. Only misconfiguration
    /// propagates.
    async fn search_with_rate_limit(
        &self,
        limiter: &RateLimiter,
        query: &SearchQuery,
        page: u32,
        limit: usize,
    ) -> SourceResult<SearchOutcome> {
        limiter.wait_if_needed(self.name()).await;

        let started = Instant::now();
        let result = self.search(query, page, limit).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let remaining_quota = limiter.remaining(self.name()).await;

        match result {
            Ok(mut results) => {
                results.truncate(limit);
                debug!(
                    "{}: {} results in {}ms",
                    self.name(),
                    results.len(),
                    latency_ms
                );
                Ok(SearchOutcome {
                    results,
                    meta: SearchMeta {
                        latency_ms,
                        remaining_quota,
                        error: None,
                    },
                })
            }
            Err(e) if e.is_recoverable() => {
                warn!("{} search failed: {}", self.name(), e);
                Ok(SearchOutcome {
                    results: Vec::new(),
                    meta: SearchMeta {
                        latency_ms,
                        remaining_quota,
                        error: Some(e.to_string()),
                    },
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::store::InMemoryStore;
    use crate::errors::SourceError;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_search_with_rate_limit_success() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()))
            .with_limit("sim", 10)
            .unwrap();
        let source = SimulatedSource::new("sim").with_result_count(5);
        let query = SearchQuery::new(&["rust"], "remote");

        let outcome = source
            .search_with_rate_limit(&limiter, &query, 1, 3)
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.meta.remaining_quota, 9);
    }

    #[tokio::test]
    async fn test_recoverable_failure_is_absorbed() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
        let source = SimulatedSource::new("flaky").with_failure(SimulatedFailure::Status(503));
        let query = SearchQuery::new(&["rust"], "remote");

        let outcome = source
            .search_with_rate_limit(&limiter, &query, 1, 10)
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.meta.error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_misconfiguration_propagates() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
        let source = SimulatedSource::new("broken").with_failure(SimulatedFailure::Misconfigured);
        let query = SearchQuery::new(&["rust"], "remote");

        let result = source.search_with_rate_limit(&limiter, &query, 1, 10).await;
        assert!(matches!(result, Err(SourceError::Misconfigured { .. })));
    }
}
