//! Result cache with cross-process request coalescing
//!
//! Search results are cached in the shared store under their query
//! fingerprint. Concurrent misses for the same fingerprint are collapsed into
//! a single upstream fetch, first inside the process and then across
//! processes through a leased in-flight claim.
//!
//! # Module Organization
//!
//! - [`config`] - TTLs, lease and waiting bounds
//! - [`entry`] - Cached result payload
//! - [`claim`] - In-flight claims and claim outcomes
//! - [`manager`] - The [`CacheLayer`] read-through and coalescer
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use job_aggregator::app::cache::{CacheConfig, CacheLayer};
//! use job_aggregator::app::store::InMemoryStore;
//! use job_aggregator::app::QueryFingerprint;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
//! let fingerprint = QueryFingerprint::compute(&["rust"], "remote", None);
//!
//! let result = cache
//!     .get_or_fetch(fingerprint, Duration::from_secs(300), || async { Ok(Vec::new()) })
//!     .await?;
//! println!("cache hit: {}", result.cache_hit);
//! # Ok(())
//! # }
//! ```

pub mod claim;
pub mod config;
pub mod entry;
pub mod manager;

pub use claim::{ClaimStatus, InFlightClaim};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use manager::{CacheLayer, CachedResult, FetchOptions};
