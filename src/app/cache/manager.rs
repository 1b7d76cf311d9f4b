//! Cache layer with request coalescing
//!
//! [`CacheLayer::get_or_fetch`] guarantees that, for one fingerprint, at most
//! one upstream fetch is in flight across every process sharing the store:
//!
//! 1. A fresh cache entry is returned directly.
//! 2. On a miss, callers in this process elect a local leader; the others
//!    wait on the leader's completion value for as long as the leader is
//!    alive, up to the claim lease plus the coalesce timeout.
//! 3. The leader claims the fingerprint in the store (`set_nx` with a lease).
//!    If another process holds the claim, the leader polls until that owner
//!    writes the cache, the claim disappears (then it retries the claim), or
//!    the bounded wait runs out (then it fetches anyway, logged).
//! 4. The owner runs the fetch in a detached task, so a caller giving up never
//!    cancels it. The cache is written before waiters are released, and the
//!    claim is dropped with a compare-and-delete after a short grace period.
//!
//! A store outage degrades to in-process coalescing only; callers still get
//! live results.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::claim::{generate_instance_id, ClaimStatus, InFlightClaim};
use super::config::CacheConfig;
use super::entry::CacheEntry;
use crate::app::fingerprint::QueryFingerprint;
use crate::app::models::JobResult;
use crate::app::stats::{Counter, Stats};
use crate::app::store::{get_json, set_json, StoreHandle};
use crate::constants::cache::{CLAIM_PREFIX, ENTRY_PREFIX};
use crate::errors::{CacheError, CacheResult, StoreError};

/// Completion value shared between a local leader and its followers
type Shared = Result<Arc<Vec<JobResult>>, CacheError>;
type Slot = Option<Shared>;

#[derive(Debug)]
struct LocalEntry {
    id: u64,
    receiver: watch::Receiver<Slot>,
}

type LocalLeaders = Arc<Mutex<HashMap<QueryFingerprint, LocalEntry>>>;

fn lock(leaders: &LocalLeaders) -> MutexGuard<'_, HashMap<QueryFingerprint, LocalEntry>> {
    leaders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// This caller leads the fetch for a fingerprint inside the process
///
/// Dropping the lead unregisters it; followers still waiting then observe an
/// abandoned fetch.
struct LocalLead {
    fingerprint: QueryFingerprint,
    id: u64,
    sender: watch::Sender<Slot>,
    leaders: LocalLeaders,
}

impl LocalLead {
    fn subscribe(&self) -> watch::Receiver<Slot> {
        self.sender.subscribe()
    }

    fn resolve(self, value: Shared) {
        self.sender.send_replace(Some(value));
    }
}

impl Drop for LocalLead {
    fn drop(&mut self) {
        let mut leaders = lock(&self.leaders);
        if leaders.get(&self.fingerprint).map(|e| e.id) == Some(self.id) {
            leaders.remove(&self.fingerprint);
        }
    }
}

enum LocalRole {
    Leader(LocalLead),
    Follower(watch::Receiver<Slot>),
}

/// Parameters of one cache read-through
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub fingerprint: QueryFingerprint,
    pub ttl: Duration,
    /// Skip the initial lookup and refresh the entry
    pub bypass_cache: bool,
}

impl FetchOptions {
    pub fn new(fingerprint: QueryFingerprint, ttl: Duration) -> Self {
        Self {
            fingerprint,
            ttl,
            bypass_cache: false,
        }
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Result of a read-through
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub jobs: Vec<JobResult>,
    /// Served from the cache (directly or after waiting on another owner)
    pub cache_hit: bool,
    /// Served by joining another caller's fetch
    pub coalesced: bool,
    /// This call ran the upstream fetch itself
    pub fetched: bool,
    /// When the served entry was cached, if it came from the store
    pub cached_at: Option<DateTime<Utc>>,
}

impl CachedResult {
    fn hit(entry: CacheEntry, coalesced: bool) -> Self {
        Self {
            jobs: entry.jobs,
            cache_hit: true,
            coalesced,
            fetched: false,
            cached_at: Some(entry.cached_at),
        }
    }

    fn joined(jobs: &[JobResult]) -> Self {
        Self {
            jobs: jobs.to_vec(),
            cache_hit: true,
            coalesced: true,
            fetched: false,
            cached_at: None,
        }
    }

    fn fetched(jobs: Vec<JobResult>) -> Self {
        Self {
            jobs,
            cache_hit: false,
            coalesced: false,
            fetched: true,
            cached_at: None,
        }
    }
}

/// Read-through cache over the shared store
#[derive(Debug, Clone)]
pub struct CacheLayer {
    store: StoreHandle,
    config: CacheConfig,
    instance_id: String,
    stats: Stats,
    leaders: LocalLeaders,
    next_lead_id: Arc<AtomicU64>,
}

impl CacheLayer {
    pub fn new(store: StoreHandle, config: CacheConfig) -> Self {
        let instance_id = config
            .instance_id
            .clone()
            .unwrap_or_else(generate_instance_id);
        info!("Cache layer started as instance {}", instance_id);

        Self {
            stats: Stats::new(Arc::clone(&store)),
            store,
            config,
            instance_id,
            leaders: Arc::new(Mutex::new(HashMap::new())),
            next_lead_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn entry_key(fingerprint: &QueryFingerprint) -> String {
        format!("{}{}", ENTRY_PREFIX, fingerprint)
    }

    fn claim_key(fingerprint: &QueryFingerprint) -> String {
        format!("{}{}", CLAIM_PREFIX, fingerprint)
    }

    /// Read a cached entry
    ///
    /// A corrupt entry is deleted and reported as a miss.
    pub async fn get(&self, fingerprint: &QueryFingerprint) -> CacheResult<Option<CacheEntry>> {
        let key = Self::entry_key(fingerprint);
        match get_json::<CacheEntry>(self.store.as_ref(), &key).await {
            Ok(entry) => Ok(entry),
            Err(StoreError::Serialization { reason, .. }) => {
                warn!("Discarding corrupt cache entry {}: {}", key, reason);
                if let Err(e) = self.store.delete(&key).await {
                    warn!("Could not delete corrupt entry {}: {}", key, e);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write an entry with the given TTL
    pub async fn put(
        &self,
        fingerprint: &QueryFingerprint,
        jobs: Vec<JobResult>,
        ttl: Duration,
    ) -> CacheResult<CacheEntry> {
        let entry = CacheEntry::new(*fingerprint, jobs, ttl);
        self.write_entry(&entry, ttl).await?;
        Ok(entry)
    }

    async fn write_entry(&self, entry: &CacheEntry, ttl: Duration) -> CacheResult<()> {
        let key = Self::entry_key(&entry.fingerprint);
        set_json(self.store.as_ref(), &key, entry, Some(ttl)).await?;
        debug!("Cached {} jobs under {} for {:?}", entry.jobs.len(), key, ttl);
        Ok(())
    }

    /// Remove one entry; returns whether it existed
    pub async fn invalidate(&self, fingerprint: &QueryFingerprint) -> CacheResult<bool> {
        Ok(self.store.delete(&Self::entry_key(fingerprint)).await?)
    }

    /// Remove every cache entry; returns how many were removed
    pub async fn clear(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for key in self.store.scan_prefix(ENTRY_PREFIX).await? {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    /// Every live cache entry
    pub async fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key in self.store.scan_prefix(ENTRY_PREFIX).await? {
            match get_json::<CacheEntry>(self.store.as_ref(), &key).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(StoreError::Serialization { .. }) => debug!("Skipping corrupt entry {}", key),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    /// Current holder of the in-flight claim for a fingerprint
    pub async fn claim_holder(
        &self,
        fingerprint: &QueryFingerprint,
    ) -> CacheResult<Option<InFlightClaim>> {
        Ok(self
            .store
            .get(&Self::claim_key(fingerprint))
            .await?
            .and_then(|raw| InFlightClaim::decode(&raw).ok()))
    }

    /// Look the fingerprint up and, on a miss, try to claim its fetch
    ///
    /// With `fresh_since`, only entries written at or after that instant
    /// count as cached.
    pub async fn check_and_claim(
        &self,
        fingerprint: &QueryFingerprint,
        fresh_since: Option<DateTime<Utc>>,
    ) -> CacheResult<ClaimStatus> {
        if let Some(entry) = self.get(fingerprint).await? {
            if fresh_since.map_or(true, |since| entry.written_since(since)) {
                return Ok(ClaimStatus::Cached(entry));
            }
        }

        let claim = InFlightClaim::new(&self.instance_id);
        let key = Self::claim_key(fingerprint);
        if self
            .store
            .set_nx(&key, &claim.encode()?, Some(self.config.claim_lease))
            .await?
        {
            debug!("Claimed fetch of {} as {}", fingerprint, claim.holder());
            return Ok(ClaimStatus::Claimed(claim));
        }

        let holder = self
            .store
            .get(&key)
            .await?
            .and_then(|raw| InFlightClaim::decode(&raw).ok())
            .map(|c| c.holder())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClaimStatus::ClaimedByOther { holder })
    }

    /// Release a claim if this owner still holds it
    pub async fn release_claim(
        &self,
        fingerprint: &QueryFingerprint,
        claim: &InFlightClaim,
    ) -> CacheResult<bool> {
        let released = self
            .store
            .delete_if_eq(&Self::claim_key(fingerprint), &claim.encode()?)
            .await?;
        if !released {
            debug!(
                "Claim {} on {} was already gone or replaced",
                claim.holder(),
                fingerprint
            );
        }
        Ok(released)
    }

    /// Remove claims whose lease ran out and forget abandoned local leaders
    ///
    /// Returns the number of store claims removed.
    pub async fn cleanup_stale_claims(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for key in self.store.scan_prefix(CLAIM_PREFIX).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let stale = match InFlightClaim::decode(&raw) {
                Ok(claim) => claim.is_expired(self.config.claim_lease),
                Err(_) => true,
            };
            if stale && self.store.delete_if_eq(&key, &raw).await? {
                warn!("Removed stale in-flight claim {}", key);
                removed += 1;
            }
        }

        lock(&self.leaders).retain(|_, entry| entry.receiver.has_changed().is_ok());
        Ok(removed)
    }

    /// Number of fetches this process currently leads
    pub fn local_in_flight(&self) -> usize {
        lock(&self.leaders).len()
    }

    /// Read through the cache with the default options
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: QueryFingerprint,
        ttl: Duration,
        fetch_fn: F,
    ) -> CacheResult<CachedResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static,
    {
        self.get_or_fetch_with(FetchOptions::new(fingerprint, ttl), fetch_fn)
            .await
    }

    /// Read through the cache, coalescing concurrent misses
    ///
    /// # Arguments
    ///
    /// * `options` - Fingerprint, TTL for a fresh entry and whether to bypass
    ///   the initial lookup
    /// * `fetch_fn` - Upstream fetch, run at most once per fingerprint across
    ///   every process sharing the store
    ///
    /// # Errors
    ///
    /// Returns the fetch's own error (shared with every joined caller, and
    /// never cached), or `CacheError::CoalescerTimeout` if this caller led the
    /// fetch and it outlived the coalesce timeout. Store failures are logged
    /// and degrade to in-process coalescing.
    pub async fn get_or_fetch_with<F, Fut>(
        &self,
        options: FetchOptions,
        fetch_fn: F,
    ) -> CacheResult<CachedResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static,
    {
        let started = Utc::now();
        let fingerprint = options.fingerprint;

        if !options.bypass_cache {
            match self.get(&fingerprint).await {
                Ok(Some(entry)) => {
                    debug!("Cache hit for {}", fingerprint);
                    return Ok(CachedResult::hit(entry, false));
                }
                Ok(None) => debug!("Cache miss for {}", fingerprint),
                Err(e) => error!(
                    "Cache lookup for {} failed, continuing without cache: {}",
                    fingerprint, e
                ),
            }
        }

        match self.local_role(fingerprint) {
            LocalRole::Follower(receiver) => self.follow(options, receiver, fetch_fn).await,
            LocalRole::Leader(lead) => self.lead(options, lead, started, fetch_fn).await,
        }
    }

    fn local_role(&self, fingerprint: QueryFingerprint) -> LocalRole {
        let mut leaders = lock(&self.leaders);
        if let Some(entry) = leaders.get(&fingerprint) {
            if entry.receiver.has_changed().is_ok() {
                return LocalRole::Follower(entry.receiver.clone());
            }
        }

        let id = self.next_lead_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        leaders.insert(fingerprint, LocalEntry { id, receiver });
        LocalRole::Leader(LocalLead {
            fingerprint,
            id,
            sender,
            leaders: Arc::clone(&self.leaders),
        })
    }

    async fn follow<F, Fut>(
        &self,
        options: FetchOptions,
        receiver: watch::Receiver<Slot>,
        fetch_fn: F,
    ) -> CacheResult<CachedResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static,
    {
        let fingerprint = options.fingerprint;
        debug!("Joining in-process fetch of {}", fingerprint);
        let deadline = Instant::now() + self.config.follower_wait();

        loop {
            let window = self
                .config
                .coalesce_timeout
                .min(deadline.saturating_duration_since(Instant::now()));

            let wait_error =
                match await_resolution(receiver.clone(), window, &fingerprint).await {
                    Ok(Ok(jobs)) => {
                        self.stats.incr(Counter::CoalescedRequests, 1).await;
                        return Ok(CachedResult::joined(&jobs));
                    }
                    Ok(Err(shared_error)) => return Err(shared_error),
                    Err(wait_error) => wait_error,
                };

            // A live leader may still be sitting out a foreign claim
            let leader_alive = receiver.has_changed().is_ok();
            if !leader_alive || Instant::now() >= deadline {
                warn!("{}; fetching {} independently", wait_error, fingerprint);
                return self.fetch_uncoordinated(options, fetch_fn).await;
            }

            if !options.bypass_cache {
                if let Ok(Some(entry)) = self.get(&fingerprint).await {
                    self.stats.incr(Counter::CoalescedRequests, 1).await;
                    return Ok(CachedResult::hit(entry, true));
                }
            }
            debug!("Leader for {} is still working, waiting again", fingerprint);
        }
    }

    async fn lead<F, Fut>(
        &self,
        options: FetchOptions,
        lead: LocalLead,
        started: DateTime<Utc>,
        fetch_fn: F,
    ) -> CacheResult<CachedResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static,
    {
        let fingerprint = options.fingerprint;
        let fresh_since = options.bypass_cache.then_some(started);
        let deadline = Instant::now() + self.config.coalesce_timeout;
        let mut waited_on_other = false;
        let mut claim = None;

        loop {
            match self.check_and_claim(&fingerprint, fresh_since).await {
                Ok(ClaimStatus::Cached(entry)) => {
                    if waited_on_other {
                        self.stats.incr(Counter::CoalescedRequests, 1).await;
                    }
                    lead.resolve(Ok(Arc::new(entry.jobs.clone())));
                    return Ok(CachedResult::hit(entry, waited_on_other));
                }
                Ok(ClaimStatus::Claimed(won)) => {
                    claim = Some(won);
                    break;
                }
                Ok(ClaimStatus::ClaimedByOther { holder }) => {
                    if Instant::now() >= deadline {
                        warn!(
                            "Gave up waiting on {} for {}; fetching without a claim",
                            holder, fingerprint
                        );
                        break;
                    }
                    if !waited_on_other {
                        debug!("Waiting on {} to fetch {}", holder, fingerprint);
                    }
                    waited_on_other = true;
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    error!(
                        "Shared store unavailable while claiming {}, fetching without a claim: {}",
                        fingerprint, e
                    );
                    break;
                }
            }
        }

        let receiver = lead.subscribe();
        self.spawn_owner(lead, claim, options.ttl, fetch_fn);

        match await_resolution(receiver, self.config.coalesce_timeout, &fingerprint).await {
            Ok(Ok(jobs)) => Ok(CachedResult::fetched(jobs.as_ref().clone())),
            Ok(Err(e)) | Err(e) => Err(e),
        }
    }

    /// Run the fetch in a detached task that always completes
    fn spawn_owner<F, Fut>(
        &self,
        lead: LocalLead,
        claim: Option<InFlightClaim>,
        ttl: Duration,
        fetch_fn: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static,
    {
        let layer = self.clone();
        let fingerprint = lead.fingerprint;

        tokio::spawn(async move {
            layer.stats.incr(Counter::UpstreamFetches, 1).await;

            let shared = match AssertUnwindSafe(fetch_fn()).catch_unwind().await {
                Ok(Ok(jobs)) => {
                    let entry = CacheEntry::new(fingerprint, jobs, ttl);
                    if let Err(e) = layer.write_entry(&entry, ttl).await {
                        error!("Could not cache results for {}: {}", fingerprint, e);
                    }
                    Ok(Arc::new(entry.jobs))
                }
                Ok(Err(e)) => {
                    warn!("Fetch for {} failed: {}", fingerprint, e);
                    Err(e)
                }
                Err(_) => {
                    error!("Fetch for {} panicked", fingerprint);
                    Err(CacheError::UpstreamFailed {
                        fingerprint: fingerprint.to_string(),
                        reason: "fetch panicked".to_string(),
                    })
                }
            };

            lead.resolve(shared);

            if let Some(claim) = claim {
                tokio::time::sleep(layer.config.release_grace).await;
                if let Err(e) = layer.release_claim(&fingerprint, &claim).await {
                    warn!("Could not release claim on {}: {}", fingerprint, e);
                }
            }
        });
    }

    /// Fetch without coordination and cache the result, best effort
    async fn fetch_uncoordinated<F, Fut>(
        &self,
        options: FetchOptions,
        fetch_fn: F,
    ) -> CacheResult<CachedResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Vec<JobResult>>> + Send + 'static,
    {
        self.stats.incr(Counter::UpstreamFetches, 1).await;
        let jobs = fetch_fn().await?;
        let entry = CacheEntry::new(options.fingerprint, jobs, options.ttl);
        if let Err(e) = self.write_entry(&entry, options.ttl).await {
            error!("Could not cache results for {}: {}", options.fingerprint, e);
        }
        Ok(CachedResult::fetched(entry.jobs))
    }
}

/// Wait for a leader's completion value
///
/// The outer error reports a wait that timed out or a leader that went away
/// without resolving; the inner result is the leader's own outcome.
async fn await_resolution(
    mut receiver: watch::Receiver<Slot>,
    timeout: Duration,
    fingerprint: &QueryFingerprint,
) -> Result<Shared, CacheError> {
    let wait = async {
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(value) = current {
                return Ok(value);
            }
            if receiver.changed().await.is_err() {
                let last = receiver.borrow().clone();
                return last.ok_or_else(|| CacheError::OwnerAbandoned {
                    fingerprint: fingerprint.to_string(),
                });
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(resolution) => resolution,
        Err(_) => Err(CacheError::CoalescerTimeout {
            fingerprint: fingerprint.to_string(),
            millis: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::store::{InMemoryStore, SharedStore};
    use std::sync::atomic::AtomicUsize;

    fn fp(q: &str) -> QueryFingerprint {
        QueryFingerprint::compute(&[q], "remote", None)
    }

    fn job(title: &str) -> JobResult {
        JobResult::new(title, "Acme", "sim", title, Utc::now())
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, CacheResult<Vec<JobResult>>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(vec![job("fetched")])
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let layer = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(300);

        let first = layer
            .get_or_fetch(fp("rust"), ttl, counting_fetch(&calls, Duration::ZERO))
            .await
            .unwrap();
        assert!(!first.cache_hit);
        assert!(first.fetched);

        let second = layer
            .get_or_fetch(fp("rust"), ttl, counting_fetch(&calls, Duration::ZERO))
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert!(!second.coalesced);
        assert_eq!(second.jobs, first.jobs);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_callers_coalesce() {
        let layer = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let layer = layer.clone();
            let fetch = counting_fetch(&calls, Duration::from_millis(200));
            handles.push(tokio::spawn(async move {
                layer
                    .get_or_fetch(fp("go"), Duration::from_secs(300), fetch)
                    .await
                    .unwrap()
            }));
        }

        let mut fetched = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.jobs.len(), 1);
            if result.fetched {
                fetched += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetched, 1);
        assert_eq!(layer.local_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processes_coalesce_through_the_store() {
        let store: StoreHandle = Arc::new(InMemoryStore::new());
        let worker_a = CacheLayer::new(store.clone(), CacheConfig::default().with_instance_id("a"));
        let worker_b = CacheLayer::new(store.clone(), CacheConfig::default().with_instance_id("b"));
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));

        let owner = {
            let fetch = counting_fetch(&calls_a, Duration::from_millis(500));
            tokio::spawn(async move {
                worker_a
                    .get_or_fetch(fp("java"), Duration::from_secs(300), fetch)
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let joined = worker_b
            .get_or_fetch(
                fp("java"),
                Duration::from_secs(300),
                counting_fetch(&calls_b, Duration::ZERO),
            )
            .await
            .unwrap();

        assert!(owner.await.unwrap().fetched);
        assert!(joined.cache_hit);
        assert!(joined.coalesced);
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_released_after_grace() {
        let store: StoreHandle = Arc::new(InMemoryStore::new());
        let layer = CacheLayer::new(store.clone(), CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        layer
            .get_or_fetch(fp("c"), Duration::from_secs(300), counting_fetch(&calls, Duration::ZERO))
            .await
            .unwrap();
        assert!(layer.claim_holder(&fp("c")).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(layer.claim_holder(&fp("c")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_owner_releases_claim() {
        let store: StoreHandle = Arc::new(InMemoryStore::new());
        let layer = CacheLayer::new(store.clone(), CacheConfig::default());

        let ClaimStatus::Claimed(mine) = layer.check_and_claim(&fp("x"), None).await.unwrap() else {
            panic!("expected to win the claim");
        };
        let impostor = InFlightClaim::new("someone-else");
        assert!(!layer.release_claim(&fp("x"), &impostor).await.unwrap());
        assert!(layer.claim_holder(&fp("x")).await.unwrap().is_some());

        assert!(layer.release_claim(&fp("x"), &mine).await.unwrap());
        assert!(layer.claim_holder(&fp("x")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_reacquired() {
        let store: StoreHandle = Arc::new(InMemoryStore::new());
        let layer = CacheLayer::new(store, CacheConfig::default());

        assert!(matches!(
            layer.check_and_claim(&fp("y"), None).await.unwrap(),
            ClaimStatus::Claimed(_)
        ));
        assert!(matches!(
            layer.check_and_claim(&fp("y"), None).await.unwrap(),
            ClaimStatus::ClaimedByOther { .. }
        ));

        tokio::time::advance(layer.config().claim_lease + Duration::from_millis(1)).await;
        assert!(matches!(
            layer.check_and_claim(&fp("y"), None).await.unwrap(),
            ClaimStatus::Claimed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_remote_claim_times_out_into_fetch() {
        let store: StoreHandle = Arc::new(InMemoryStore::new());
        // A crashed process left a claim that outlives the waiter timeout
        let crashed = InFlightClaim::new("crashed");
        store
            .set(
                &CacheLayer::claim_key(&fp("z")),
                &crashed.encode().unwrap(),
                Some(Duration::from_secs(3600)),
            )
            .await
            .unwrap();

        let layer = CacheLayer::new(store, CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let result = layer
            .get_or_fetch(fp("z"), Duration::from_secs(300), counting_fetch(&calls, Duration::ZERO))
            .await
            .unwrap();

        assert!(result.fetched);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_followers_wait_out_abandoned_claim_with_leader() {
        let store: StoreHandle = Arc::new(InMemoryStore::new());
        let config = CacheConfig::default();
        let crashed = InFlightClaim::new("crashed");
        store
            .set(
                &CacheLayer::claim_key(&fp("slow")),
                &crashed.encode().unwrap(),
                Some(config.claim_lease),
            )
            .await
            .unwrap();

        // Lease wait plus a slow fetch outlasts one coalesce timeout
        let layer = CacheLayer::new(store, config);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let layer = layer.clone();
            let fetch = counting_fetch(&calls, Duration::from_secs(12));
            handles.push(tokio::spawn(async move {
                layer
                    .get_or_fetch(fp("slow"), Duration::from_secs(300), fetch)
                    .await
                    .unwrap()
            }));
        }

        let mut fetched = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.jobs.len(), 1);
            fetched += usize::from(result.fetched);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetched, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let layer = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
        let result = layer
            .get_or_fetch(fp("err"), Duration::from_secs(300), || async {
                Err(CacheError::UpstreamFailed {
                    fingerprint: "err".to_string(),
                    reason: "all sources failed".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(CacheError::UpstreamFailed { .. })));
        assert!(layer.get(&fp("err")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bypass_refreshes_entry() {
        let layer = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
        layer
            .put(&fp("warm"), vec![job("stale")], Duration::from_secs(300))
            .await
            .unwrap();

        let result = layer
            .get_or_fetch_with(
                FetchOptions::new(fp("warm"), Duration::from_secs(300)).bypass_cache(),
                || async { Ok(vec![job("fresh")]) },
            )
            .await
            .unwrap();
        assert!(result.fetched);

        let entry = layer.get(&fp("warm")).await.unwrap().unwrap();
        assert_eq!(entry.jobs[0].title, "fresh");
    }

    #[tokio::test]
    async fn test_store_outage_still_fetches() {
        let store = Arc::new(InMemoryStore::new());
        let layer = CacheLayer::new(store.clone(), CacheConfig::default());
        store.set_offline(true);

        let result = layer
            .get_or_fetch(fp("down"), Duration::from_secs(300), || async {
                Ok(vec![job("live")])
            })
            .await
            .unwrap();
        assert_eq!(result.jobs[0].title, "live");
        assert!(!result.cache_hit);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let store = Arc::new(InMemoryStore::new());
        let layer = CacheLayer::new(store.clone(), CacheConfig::default());
        store
            .set(&CacheLayer::entry_key(&fp("bad")), "{oops", None)
            .await
            .unwrap();

        assert!(layer.get(&fp("bad")).await.unwrap().is_none());
        assert!(store.get(&CacheLayer::entry_key(&fp("bad"))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_entries_and_invalidate() {
        let layer = CacheLayer::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
        let ttl = Duration::from_secs(60);
        layer.put(&fp("a"), vec![job("a")], ttl).await.unwrap();
        layer.put(&fp("b"), vec![job("b")], ttl).await.unwrap();
        assert_eq!(layer.entries().await.unwrap().len(), 2);

        assert!(layer.invalidate(&fp("a")).await.unwrap());
        assert_eq!(layer.clear().await.unwrap(), 1);
        assert!(layer.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_claims() {
        let store: StoreHandle = Arc::new(InMemoryStore::new());
        let layer = CacheLayer::new(store.clone(), CacheConfig::default());

        let mut old = InFlightClaim::new("gone");
        old.claimed_at = Utc::now() - chrono::Duration::seconds(120);
        store
            .set(&CacheLayer::claim_key(&fp("old")), &old.encode().unwrap(), None)
            .await
            .unwrap();
        let fresh = InFlightClaim::new("alive");
        store
            .set(&CacheLayer::claim_key(&fp("new")), &fresh.encode().unwrap(), None)
            .await
            .unwrap();

        assert_eq!(layer.cleanup_stale_claims().await.unwrap(), 1);
        assert!(layer.claim_holder(&fp("new")).await.unwrap().is_some());
    }
}
