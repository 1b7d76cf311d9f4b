//! Simulated source for tests and load simulation
//!
//! Behaves like an upstream adapter without touching the network: it answers
//! after a configurable latency, can be told to fail in any of the ways a real
//! upstream fails, and counts every call so callers can assert how many
//! upstream requests a scenario produced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::SourceAdapter;
use crate::app::fingerprint::SearchQuery;
use crate::app::models::{JobResult, JobType};
use crate::errors::{SourceError, SourceResult};

/// Failure modes a simulated source can exhibit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// Upstream answers with the given HTTP status
    Status(u16),
    /// Upstream times out
    Timeout,
    /// Upstream payload cannot be decoded
    Decode,
    /// Upstream throttles us
    Throttled,
    /// Adapter is misconfigured
    Misconfigured,
    /// Adapter panics mid-call
    Panic,
    /// Upstream never answers
    Hang,
}

/// In-process stand-in for an upstream API
#[derive(Debug)]
pub struct SimulatedSource {
    name: String,
    rate_limit: u32,
    quota_constrained: bool,
    latency: Duration,
    result_count: usize,
    posted_base: DateTime<Utc>,
    fixed_jobs: Option<Vec<JobResult>>,
    failure: Mutex<Option<SimulatedFailure>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedSource {
    /// Create a healthy source returning generated listings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rate_limit: 60,
            quota_constrained: false,
            latency: Duration::ZERO,
            result_count: 10,
            posted_base: Utc
                .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            fixed_jobs: None,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit = requests_per_minute;
        self
    }

    pub fn with_quota_constrained(mut self, constrained: bool) -> Self {
        self.quota_constrained = constrained;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of generated listings per call
    pub fn with_result_count(mut self, count: usize) -> Self {
        self.result_count = count;
        self
    }

    /// Timestamp of the newest generated listing
    pub fn with_posted_base(mut self, base: DateTime<Utc>) -> Self {
        self.posted_base = base;
        self
    }

    /// Always return these listings instead of generated ones
    pub fn with_jobs(mut self, jobs: Vec<JobResult>) -> Self {
        self.fixed_jobs = Some(jobs);
        self
    }

    pub fn with_failure(self, failure: SimulatedFailure) -> Self {
        self.set_failure(Some(failure));
        self
    }

    /// Change the failure mode at runtime; `None` makes the source healthy
    pub fn set_failure(&self, failure: Option<SimulatedFailure>) {
        let mut guard = self.failure.lock().unwrap_or_else(|p| p.into_inner());
        *guard = failure;
    }

    /// Number of `search` calls received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `search` calls observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.peak_in_flight.store(0, Ordering::SeqCst);
    }

    fn current_failure(&self) -> Option<SimulatedFailure> {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn generate(&self, query: &SearchQuery, limit: usize) -> Vec<JobResult> {
        if let Some(jobs) = &self.fixed_jobs {
            return jobs.iter().take(limit).cloned().collect();
        }

        let topic = match query.keyword_string() {
            k if k.is_empty() => "general".to_string(),
            k => k,
        };
        (0..self.result_count.min(limit))
            .map(|i| {
                let mut job = JobResult::new(
                    format!("{} role {}", topic, i),
                    format!("{} Labs", self.name),
                    self.name.clone(),
                    format!("{}-{}", self.name, i),
                    self.posted_base - chrono::Duration::hours(i as i64),
                );
                job.location = query.location.clone();
                job.remote = i % 2 == 0;
                job.job_type = if i % 3 == 0 {
                    JobType::Contract
                } else {
                    JobType::FullTime
                };
                job.salary_min = Some(50_000 + 10_000 * i as i64);
                job.salary_max = Some(80_000 + 10_000 * i as i64);
                job.redirect_url = format!("https://jobs.example/{}/{}", self.name, i);
                job
            })
            .collect()
    }

    fn failure_error(&self, failure: SimulatedFailure) -> SourceError {
        let source_name = self.name.clone();
        match failure {
            SimulatedFailure::Status(status) => SourceError::Status {
                source_name,
                status,
            },
            SimulatedFailure::Timeout => SourceError::Timeout {
                source_name,
                millis: self.latency.as_millis() as u64,
            },
            SimulatedFailure::Decode => SourceError::Decode {
                source_name,
                reason: "unexpected end of input".to_string(),
            },
            SimulatedFailure::Throttled => SourceError::Throttled { source_name },
            SimulatedFailure::Misconfigured => SourceError::Misconfigured {
                source_name,
                reason: "simulated misconfiguration".to_string(),
            },
            SimulatedFailure::Panic | SimulatedFailure::Hang => SourceError::Decode {
                source_name,
                reason: format!("{:?}", failure),
            },
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceAdapter for SimulatedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    fn is_quota_constrained(&self) -> bool {
        self.quota_constrained
    }

    async fn search(
        &self,
        query: &SearchQuery,
        _page: u32,
        limit: usize,
    ) -> SourceResult<Vec<JobResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.current_failure() {
            None => Ok(self.generate(query, limit)),
            Some(SimulatedFailure::Panic) => panic!("simulated source {} panicked", self.name),
            Some(SimulatedFailure::Hang) => {
                std::future::pending::<()>().await;
                Err(self.failure_error(SimulatedFailure::Hang))
            }
            Some(failure) => Err(self.failure_error(failure)),
        }
    }

    async fn fetch_by_id(&self, external_id: &str) -> SourceResult<Option<JobResult>> {
        Ok(self
            .fixed_jobs
            .as_ref()
            .and_then(|jobs| jobs.iter().find(|job| job.external_id == external_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_results_respect_limit() {
        let source = SimulatedSource::new("sim").with_result_count(8);
        let query = SearchQuery::new(&["rust"], "Berlin");

        let jobs = source.search(&query, 1, 5).await.unwrap();
        assert_eq!(jobs.len(), 5);
        assert!(jobs.iter().all(|j| j.source == "sim" && j.location == "Berlin"));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_can_be_toggled() {
        let source = SimulatedSource::new("sim").with_failure(SimulatedFailure::Timeout);
        let query = SearchQuery::new(&["rust"], "Berlin");

        assert!(matches!(
            source.search(&query, 1, 5).await,
            Err(SourceError::Timeout { .. })
        ));

        source.set_failure(None);
        assert!(source.search(&query, 1, 5).await.is_ok());
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fixed_jobs_and_fetch_by_id() {
        let job = JobResult::new("Rust Engineer", "Ferris", "sim", "abc", Utc::now());
        let source = SimulatedSource::new("sim").with_jobs(vec![job.clone()]);

        assert_eq!(source.fetch_by_id("abc").await.unwrap(), Some(job));
        assert_eq!(source.fetch_by_id("missing").await.unwrap(), None);
    }
}
