//! Application constants for the job aggregator
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Environment variable names for upstream API credentials
pub mod env {
    /// Adzuna application id
    pub const ADZUNA_APP_ID: &str = "ADZUNA_APP_ID";

    /// Adzuna application key
    pub const ADZUNA_APP_KEY: &str = "ADZUNA_APP_KEY";

    /// RapidAPI key used by JSearch
    pub const JSEARCH_API_KEY: &str = "JSEARCH_API_KEY";

    /// Redis connection URL override
    pub const REDIS_URL: &str = "JOB_AGGREGATOR_REDIS_URL";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "job-aggregator/0.1.0 (+https://github.com/job-aggregator)";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in each adapter's pool
    pub const POOL_MAX_PER_HOST: usize = 10;
}

/// Rate limiting and retry configuration
pub mod limits {
    use super::Duration;

    /// Fixed rate-limit window length
    pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

    /// Requests per window for sources without an explicit limit
    pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;

    /// Upper bound on jitter added when sleeping until the next window
    pub const WINDOW_WAIT_JITTER_MS: u64 = 250;

    /// Local per-adapter smoothing limit (requests per second)
    pub const LOCAL_BURST_RPS: u32 = 5;

    /// Maximum HTTP retry attempts for 429/503/transport failures
    pub const MAX_RETRIES: u32 = 2;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 250;
}

/// Aggregator fan-out constants
pub mod aggregator {
    use super::Duration;

    /// Maximum simultaneous outbound source calls
    pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

    /// Per-source timeout inside a fan-out
    pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(15);

    /// Results requested from each source
    pub const DEFAULT_LIMIT_PER_SOURCE: usize = 20;

    /// Upper bound on merged results kept in a cache entry
    pub const DEFAULT_MAX_RESULTS: usize = 200;
}

/// Cache and coalescing constants
pub mod cache {
    use super::Duration;

    /// TTL for multi-source aggregates
    pub const AGGREGATE_TTL: Duration = Duration::from_secs(300);

    /// TTL for single quota-constrained source results
    pub const QUOTA_SOURCE_TTL: Duration = Duration::from_secs(3600);

    /// Lease on an in-flight claim; shorter than the waiter timeout so an
    /// abandoned claim expires before waiters give up
    pub const CLAIM_LEASE: Duration = Duration::from_secs(20);

    /// Bounded wait for another owner's fetch
    pub const COALESCE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Claim kept after completion so late joiners still see the fresh entry
    pub const RELEASE_GRACE: Duration = Duration::from_secs(2);

    /// Poll interval while waiting on an owner in another process
    pub const REMOTE_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Key prefix for cache entries
    pub const ENTRY_PREFIX: &str = "jobs:cache:";

    /// Key prefix for in-flight claims
    pub const CLAIM_PREFIX: &str = "jobs:inflight:";
}

/// Batch queue constants
pub mod batch {
    use super::Duration;

    /// Interval between batch cycles
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

    /// Maximum queued requests executed per cycle
    pub const DEFAULT_MAX_REQUESTS: usize = 50;

    /// Attempts before a failing entry is dropped
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Lock TTL for one batch cycle
    pub const CYCLE_LOCK_TTL: Duration = Duration::from_secs(600);

    /// Default priority for queued requests
    pub const DEFAULT_PRIORITY: u32 = 100;

    /// High priority for premium or interactive callers
    pub const HIGH_PRIORITY: u32 = 200;

    /// Low priority for background requests
    pub const LOW_PRIORITY: u32 = 50;

    /// Hash holding queued requests
    pub const QUEUE_KEY: &str = "jobs:batch:queue";

    /// Hash holding dedup counters per fingerprint
    pub const DEDUP_KEY: &str = "jobs:batch:dedup";

    /// Hash holding attempt counters per fingerprint
    pub const ATTEMPTS_KEY: &str = "jobs:batch:attempts";

    /// Insertion sequence counter
    pub const SEQUENCE_KEY: &str = "jobs:batch:seq";

    /// Cycle lock key
    pub const LOCK_KEY: &str = "jobs:batch:lock";
}

/// Shared stats counters
pub mod stats {
    /// Key prefix for stats counters
    pub const PREFIX: &str = "jobs:stats:";
}

/// Scheduler constants
pub mod scheduler {
    use super::Duration;

    /// Interval between cache warming runs
    pub const WARM_INTERVAL: Duration = Duration::from_secs(900);

    /// Interval for stale claim cleanup
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(120);

    /// Timeout for background task shutdown
    pub const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
}

// Re-export commonly used constants for convenience
pub use aggregator::DEFAULT_MAX_CONCURRENCY;
pub use cache::{AGGREGATE_TTL, QUOTA_SOURCE_TTL};
pub use http::{DEFAULT_TIMEOUT as HTTP_TIMEOUT, USER_AGENT};
pub use limits::{DEFAULT_REQUESTS_PER_MINUTE, RATE_LIMIT_WINDOW};
