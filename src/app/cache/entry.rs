//! Cached search results

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::fingerprint::QueryFingerprint;
use crate::app::models::JobResult;

/// A cached result set, stored as JSON under `jobs:cache:{fingerprint}`
///
/// Expiry is enforced by the store TTL; `ttl_secs` is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: QueryFingerprint,
    pub jobs: Vec<JobResult>,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: QueryFingerprint, jobs: Vec<JobResult>, ttl: Duration) -> Self {
        Self {
            fingerprint,
            jobs,
            cached_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    /// When the entry is due to expire
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.cached_at + chrono::Duration::seconds(self.ttl_secs as i64)
    }

    /// Whether the entry was written at or after `instant`
    pub fn written_since(&self, instant: DateTime<Utc>) -> bool {
        self.cached_at >= instant
    }

    /// Age of the entry
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_and_freshness() {
        let fp = QueryFingerprint::compute(&["rust"], "berlin", None);
        let before = Utc::now() - chrono::Duration::seconds(1);
        let entry = CacheEntry::new(fp, Vec::new(), Duration::from_secs(300));

        assert_eq!(entry.expires_at() - entry.cached_at, chrono::Duration::seconds(300));
        assert!(entry.written_since(before));
        assert!(!entry.written_since(Utc::now() + chrono::Duration::seconds(5)));
        assert!(entry.age() < Duration::from_secs(5));
    }
}
