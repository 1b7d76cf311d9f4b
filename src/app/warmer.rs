//! Proactive refresh of popular queries
//!
//! The warmer re-fetches a configured list of queries with the cache
//! bypassed so hot entries are renewed before they expire under load. It
//! goes through the coalescer like any caller, so warming never duplicates a
//! fetch already in flight.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::cache::{CacheLayer, FetchOptions};
use crate::app::fingerprint::SearchQuery;
use crate::app::models::JobResult;
use crate::errors::CacheResult;

/// A (keywords, location) pair kept warm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularQuery {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub location: String,
}

impl PopularQuery {
    pub fn new<S: AsRef<str>>(keywords: &[S], location: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.as_ref().to_string()).collect(),
            location: location.to_string(),
        }
    }

    pub fn query(&self) -> SearchQuery {
        SearchQuery::new(&self.keywords, &self.location)
    }
}

/// Outcome of one warming run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmSummary {
    pub attempted: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Listings written across all refreshed entries
    pub jobs_cached: usize,
    pub duration_ms: u64,
}

/// Refreshes popular queries through the cache layer
#[derive(Debug, Clone)]
pub struct CacheWarmer {
    cache: CacheLayer,
    ttl: Duration,
}

impl CacheWarmer {
    pub fn new(cache: CacheLayer) -> Self {
        let ttl = cache.config().aggregate_ttl;
        Self { cache, ttl }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Re-fetch every query, one at a time
    pub async fn warm_cache<F, Fut>(&self, popular_queries: &[PopularQuery], fetch_fn: F) -> WarmSummary
    where
        F: Fn(SearchQuery) -> Fut,
        Fut: Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static,
    {
        let started = Instant::now();
        let mut summary = WarmSummary::default();

        for popular in popular_queries {
            summary.attempted += 1;
            let query = popular.query();
            let options = FetchOptions::new(query.fingerprint(), self.ttl).bypass_cache();
            let fetch = fetch_fn(query.clone());

            match self.cache.get_or_fetch_with(options, move || fetch).await {
                Ok(result) => {
                    summary.refreshed += 1;
                    summary.jobs_cached += result.jobs.len();
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        "Could not warm [{}] in {:?}: {}",
                        query.keyword_string(),
                        query.location,
                        e
                    );
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Cache warming refreshed {}/{} queries ({} listings) in {}ms",
            summary.refreshed, summary.attempted, summary.jobs_cached, summary.duration_ms
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::cache::CacheConfig;
    use crate::app::store::InMemoryStore;
    use crate::errors::CacheError;
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_warming_replaces_existing_entries() {
        let cache = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
        let popular = vec![PopularQuery::new(&["rust"], "remote")];
        let fingerprint = popular[0].query().fingerprint();
        cache
            .put(&fingerprint, Vec::new(), Duration::from_secs(60))
            .await
            .unwrap();

        let warmer = CacheWarmer::new(cache.clone());
        let summary = warmer
            .warm_cache(&popular, |query| async move {
                Ok(vec![JobResult::new(
                    format!("{} engineer", query.keyword_string()),
                    "Acme",
                    "sim",
                    "1",
                    Utc::now(),
                )])
            })
            .await;

        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.jobs_cached, 1);
        let entry = cache.get(&fingerprint).await.unwrap().unwrap();
        assert_eq!(entry.jobs[0].title, "rust engineer");
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let cache = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
        let popular = vec![
            PopularQuery::new(&["go"], ""),
            PopularQuery::new(&["java"], ""),
        ];

        let summary = CacheWarmer::new(cache)
            .warm_cache(&popular, |query| async move {
                if query.keywords[0] == "go" {
                    Ok(Vec::new())
                } else {
                    Err(CacheError::UpstreamFailed {
                        fingerprint: query.fingerprint().to_string(),
                        reason: "all sources failed".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.failed, 1);
    }
}
