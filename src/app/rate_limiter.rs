//! Distributed fixed-window rate limiter
//!
//! Each source gets a request budget per window (60 s by default). The budget
//! lives in the shared store under `ratelimit:{source}:{window_id}`, so every
//! worker process draws from the same counter. A call is admitted iff the
//! post-increment count is within the limit.
//!
//! Fixed windows admit up to twice the limit across a window boundary; this is
//! accepted. Store failures admit the call (fail open) and are logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::app::store::StoreHandle;
use crate::constants::limits;
use crate::errors::RateLimitError;

/// Source of wall-clock time in epoch milliseconds
pub type EpochClock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> EpochClock {
    Arc::new(|| Utc::now().timestamp_millis())
}

/// Per-source request budgets shared across processes
#[derive(Clone)]
pub struct RateLimiter {
    store: StoreHandle,
    window: Duration,
    default_limit: u32,
    limits: HashMap<String, u32>,
    clock: EpochClock,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("default_limit", &self.default_limit)
            .field("limits", &self.limits)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with the default window and default limit
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            window: limits::RATE_LIMIT_WINDOW,
            default_limit: limits::DEFAULT_REQUESTS_PER_MINUTE,
            limits: HashMap::new(),
            clock: system_clock(),
        }
    }

    /// Set the window length
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.max(Duration::from_secs(1));
        self
    }

    /// Set the limit applied to sources without their own
    pub fn with_default_limit(mut self, limit: u32) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::ZeroLimit {
                source_name: "<default>".to_string(),
            });
        }
        self.default_limit = limit;
        Ok(self)
    }

    /// Set the limit for one source
    pub fn with_limit(mut self, source: &str, limit: u32) -> Result<Self, RateLimitError> {
        self.set_limit(source, limit)?;
        Ok(self)
    }

    /// Replace the wall clock used for window ids
    pub fn with_clock(mut self, clock: EpochClock) -> Self {
        self.clock = clock;
        self
    }

    /// Set the limit for one source in place
    pub fn set_limit(&mut self, source: &str, limit: u32) -> Result<(), RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::ZeroLimit {
                source_name: source.to_string(),
            });
        }
        self.limits.insert(source.to_string(), limit);
        Ok(())
    }

    /// Requests allowed per window for `source`
    pub fn limit_for(&self, source: &str) -> u32 {
        self.limits
            .get(source)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    fn window_millis(&self) -> i64 {
        self.window.as_millis() as i64
    }

    fn window_id(&self) -> i64 {
        (self.clock)().div_euclid(self.window_millis())
    }

    fn window_key(source: &str, window_id: i64) -> String {
        format!("ratelimit:{}:{}", source, window_id)
    }

    /// Time until the current window closes
    pub fn time_until_next_window(&self) -> Duration {
        let window = self.window_millis();
        let elapsed = (self.clock)().rem_euclid(window);
        Duration::from_millis((window - elapsed) as u64)
    }

    /// Consume one request from the current window if the budget allows
    ///
    /// Returns `true` when the call may proceed. A denied call still counts
    /// against the window; the counter only decides admission.
    pub async fn is_allowed(&self, source: &str) -> bool {
        let limit = self.limit_for(source);
        let key = Self::window_key(source, self.window_id());

        match self.store.incr(&key, 1, Some(self.window)).await {
            Ok(count) => {
                let allowed = count <= limit as i64;
                if allowed {
                    debug!("{}: request {}/{} in window", source, count, limit);
                } else {
                    debug!("{}: window exhausted ({} > {})", source, count, limit);
                }
                allowed
            }
            Err(e) => {
                error!(
                    "Rate limit store unavailable for {}, allowing request: {}",
                    source, e
                );
                true
            }
        }
    }

    /// Like [`RateLimiter::is_allowed`], as a `Result`
    pub async fn check(&self, source: &str) -> Result<(), RateLimitError> {
        if self.is_allowed(source).await {
            Ok(())
        } else {
            Err(RateLimitError::Exceeded {
                source_name: source.to_string(),
                limit: self.limit_for(source),
            })
        }
    }

    /// Requests left in the current window without consuming one
    pub async fn remaining(&self, source: &str) -> u32 {
        let limit = self.limit_for(source);
        let key = Self::window_key(source, self.window_id());

        match self.store.get(&key).await {
            Ok(Some(raw)) => {
                let used = raw.parse::<i64>().unwrap_or(0).max(0);
                (limit as i64 - used).max(0) as u32
            }
            Ok(None) => limit,
            Err(e) => {
                error!("Could not read rate limit window for {}: {}", source, e);
                limit
            }
        }
    }

    /// Block until a request for `source` is admitted
    ///
    /// Sleeps to the next window boundary (plus jitter so waiting processes do
    /// not stampede the new window) and retries. Returns the total time slept.
    /// Quota consumed by an attempt is not refunded if the caller is cancelled.
    pub async fn wait_if_needed(&self, source: &str) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            if self.is_allowed(source).await {
                if !waited.is_zero() {
                    debug!("{}: admitted after waiting {:?}", source, waited);
                }
                return waited;
            }

            let jitter = Duration::from_millis(fastrand::u64(0..=limits::WINDOW_WAIT_JITTER_MS));
            let delay = self.time_until_next_window() + jitter;
            warn!(
                "{}: rate limit of {} per {:?} reached, waiting {}ms",
                source,
                self.limit_for(source),
                self.window,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::store::InMemoryStore;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn manual_clock(start: i64) -> (Arc<AtomicI64>, EpochClock) {
        let now = Arc::new(AtomicI64::new(start));
        let handle = Arc::clone(&now);
        (now, Arc::new(move || handle.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn test_nth_allowed_next_denied() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::new(store).with_limit("adzuna", 3).unwrap();

        for _ in 0..3 {
            assert!(limiter.is_allowed("adzuna").await);
        }
        assert!(!limiter.is_allowed("adzuna").await);
        assert_eq!(limiter.remaining("adzuna").await, 0);
    }

    #[tokio::test]
    async fn test_sources_have_independent_budgets() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::new(store)
            .with_limit("jsearch", 1)
            .unwrap()
            .with_default_limit(5)
            .unwrap();

        assert!(limiter.is_allowed("jsearch").await);
        assert!(!limiter.is_allowed("jsearch").await);

        assert!(limiter.is_allowed("remotive").await);
        assert_eq!(limiter.remaining("remotive").await, 4);
    }

    #[tokio::test]
    async fn test_new_window_resets_budget() {
        let store = Arc::new(InMemoryStore::new());
        let (now, clock) = manual_clock(1_700_000_000_000);
        let limiter = RateLimiter::new(store)
            .with_limit("arbeitnow", 2)
            .unwrap()
            .with_clock(clock);

        assert!(limiter.is_allowed("arbeitnow").await);
        assert!(limiter.is_allowed("arbeitnow").await);
        assert!(!limiter.is_allowed("arbeitnow").await);

        now.fetch_add(60_000, Ordering::SeqCst);
        assert!(limiter.is_allowed("arbeitnow").await);
        assert_eq!(limiter.remaining("arbeitnow").await, 1);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::new(store.clone()).with_limit("adzuna", 1).unwrap();

        store.set_offline(true);
        for _ in 0..5 {
            assert!(limiter.is_allowed("adzuna").await);
        }
        assert_eq!(limiter.remaining("adzuna").await, 1);
    }

    #[tokio::test]
    async fn test_check_reports_exceeded() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::new(store).with_limit("themuse", 1).unwrap();

        assert!(limiter.check("themuse").await.is_ok());
        match limiter.check("themuse").await {
            Err(RateLimitError::Exceeded { source_name, limit }) => {
                assert_eq!(source_name, "themuse");
                assert_eq!(limit, 1);
            }
            other => panic!("expected Exceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        let store = Arc::new(InMemoryStore::new());
        assert!(matches!(
            RateLimiter::new(store.clone()).with_limit("adzuna", 0),
            Err(RateLimitError::ZeroLimit { .. })
        ));
        assert!(RateLimiter::new(store).with_default_limit(0).is_err());
    }

    #[test]
    fn test_time_until_next_window() {
        let store = Arc::new(InMemoryStore::new());
        let (_, clock) = manual_clock(125_000);
        let limiter = RateLimiter::new(store).with_clock(clock);
        assert_eq!(limiter.time_until_next_window(), Duration::from_secs(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_if_needed_sleeps_into_next_window() {
        let store = Arc::new(InMemoryStore::new());
        let (now, clock) = manual_clock(0);
        let limiter = Arc::new(
            RateLimiter::new(store)
                .with_limit("jsearch", 1)
                .unwrap()
                .with_clock(clock),
        );

        assert_eq!(limiter.wait_if_needed("jsearch").await, Duration::ZERO);

        // Move the wall clock into the next window while the waiter sleeps
        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.wait_if_needed("jsearch").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        now.store(60_000, Ordering::SeqCst);

        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_secs(60));
        assert!(waited <= Duration::from_millis(60_000 + limits::WINDOW_WAIT_JITTER_MS));
    }
}
