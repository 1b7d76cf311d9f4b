//! Prelude module for the Job Aggregator library
//!
//! Re-exports the items needed for typical usage with a single
//! `use job_aggregator::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use job_aggregator::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = SourceRegistry::new().with(Arc::new(SimulatedSource::new("demo")))?;
//!     let engine = JobSearchEngine::new(
//!         Arc::new(InMemoryStore::new()),
//!         registry,
//!         EngineConfig::default(),
//!     )?;
//!
//!     let response = engine.search(&["rust"], "", &SearchFilters::default(), 10).await;
//!     println!("{} jobs", response.jobs.len());
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Essential app components
pub use crate::app::{
    // Engine
    EngineConfig,
    JobSearchEngine,
    SearchFilters,
    SearchResponse,

    // Components
    BatchQueueManager,
    CacheLayer,
    RateLimiter,
    Scheduler,
    SchedulerConfig,

    // Sources
    ClientConfig,
    SimulatedSource,
    SourceAdapter,
    SourceRegistry,
    SourceSettings,

    // Data types
    JobResult,
    JobType,
    PopularQuery,
    QueryFingerprint,
    SearchQuery,

    // Store
    InMemoryStore,
    SharedStore,
    StoreHandle,
};

// Application configuration
pub use crate::config::AppConfig;

// Standard library re-exports that are commonly needed
pub use std::sync::Arc;

pub use tokio;
