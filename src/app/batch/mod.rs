//! Batch queue for quota-constrained sources
//!
//! Sources with a tight paid quota are never called on the request path.
//! Callers queue their query instead; identical queries share one slot, and
//! a scheduled drain cycle executes each slot once and caches the result for
//! the whole batch window.
//!
//! # Module Organization
//!
//! - [`config`] - Cycle size, attempts and result TTL
//! - [`types`] - Queue entries, priorities and cycle summaries
//! - [`manager`] - The [`BatchQueueManager`]

pub mod config;
pub mod manager;
pub mod types;

pub use config::BatchConfig;
pub use manager::BatchQueueManager;
pub use types::{BatchSummary, Priority, QueuedRequest};
