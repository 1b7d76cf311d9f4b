//! Core engine for the job aggregator
//!
//! This module contains the aggregation engine: the shared store
//! abstraction, source adapters, the distributed rate limiter, the fan-out
//! aggregator, the coalescing cache, the batch queue and the background
//! scheduler.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use job_aggregator::app::{
//!     ClientConfig, EngineConfig, InMemoryStore, JobSearchEngine, SearchFilters, SourceRegistry,
//!     SourceSettings,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SourceRegistry::from_settings(&SourceSettings::defaults(), &ClientConfig::default())?;
//! let engine = JobSearchEngine::new(Arc::new(InMemoryStore::new()), registry, EngineConfig::default())?;
//!
//! let response = engine
//!     .search(&["rust", "developer"], "remote", &SearchFilters::default(), 20)
//!     .await;
//! for job in &response.jobs {
//!     println!("{} at {} ({})", job.title, job.company, job.source);
//! }
//! println!("cache hit: {}", response.meta.cache_hit);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod batch;
pub mod cache;
pub mod engine;
pub mod fingerprint;
pub mod models;
pub mod rate_limiter;
pub mod scheduler;
pub mod sources;
pub mod stats;
pub mod store;
pub mod warmer;

// Re-export main public API
pub use aggregator::{AggregateMeta, AggregateResult, Aggregator, AggregatorConfig};
pub use batch::{BatchConfig, BatchQueueManager, BatchSummary, Priority, QueuedRequest};
pub use cache::{CacheConfig, CacheEntry, CacheLayer, CachedResult, FetchOptions};
pub use engine::{EngineConfig, JobSearchEngine, ResponseMeta, SearchFilters, SearchResponse};
pub use fingerprint::{QueryFingerprint, SearchQuery};
pub use models::{JobResult, JobType};
pub use rate_limiter::RateLimiter;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use sources::{
    ClientConfig, SimulatedFailure, SimulatedSource, SourceAdapter, SourceKind, SourceRegistry,
    SourceSettings,
};
pub use stats::{Counter, EngineStats, Stats};
pub use store::{InMemoryStore, SharedStore, StoreHandle};
pub use warmer::{CacheWarmer, PopularQuery, WarmSummary};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        // Ensure public API is accessible
        let config = ClientConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(EngineConfig::default().cache.claim_lease.as_secs(), 20);
    }
}
