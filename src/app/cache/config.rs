//! Cache configuration types and defaults

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::cache;

/// Configuration for the cache and coalescer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for multi-source aggregates
    pub aggregate_ttl: Duration,
    /// TTL for results of a single quota-constrained source
    pub quota_source_ttl: Duration,
    /// Lease on an in-flight claim (shorter than `coalesce_timeout`)
    pub claim_lease: Duration,
    /// Bounded wait for another owner's fetch
    pub coalesce_timeout: Duration,
    /// How long a completed claim is kept before release
    pub release_grace: Duration,
    /// Poll interval while another process owns the fetch
    pub poll_interval: Duration,
    /// Identity of this process in claims (generated if `None`)
    pub instance_id: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            aggregate_ttl: cache::AGGREGATE_TTL,
            quota_source_ttl: cache::QUOTA_SOURCE_TTL,
            claim_lease: cache::CLAIM_LEASE,
            coalesce_timeout: cache::COALESCE_TIMEOUT,
            release_grace: cache::RELEASE_GRACE,
            poll_interval: cache::REMOTE_POLL_INTERVAL,
            instance_id: None,
        }
    }
}

impl CacheConfig {
    /// TTL for an entry, depending on whether it holds one quota source
    pub fn ttl_for(&self, single_quota_source: bool) -> Duration {
        if single_quota_source {
            self.quota_source_ttl
        } else {
            self.aggregate_ttl
        }
    }

    /// Longest a local follower waits on its leader
    ///
    /// The leader may sit out a foreign claim until its lease runs out and
    /// then run its own fetch, so followers allow for both.
    pub fn follower_wait(&self) -> Duration {
        self.claim_lease + self.coalesce_timeout
    }

    pub fn with_aggregate_ttl(mut self, ttl: Duration) -> Self {
        self.aggregate_ttl = ttl;
        self
    }

    pub fn with_quota_source_ttl(mut self, ttl: Duration) -> Self {
        self.quota_source_ttl = ttl;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_coalesce_timeout(mut self, timeout: Duration) -> Self {
        self.coalesce_timeout = timeout;
        self
    }

    pub fn with_release_grace(mut self, grace: Duration) -> Self {
        self.release_grace = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Check the timing relationships the coalescer relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.claim_lease >= self.coalesce_timeout {
            return Err(format!(
                "claim lease ({:?}) must be shorter than the coalesce timeout ({:?})",
                self.claim_lease, self.coalesce_timeout
            ));
        }
        if self.aggregate_ttl.is_zero() || self.quota_source_ttl.is_zero() {
            return Err("cache TTLs must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.aggregate_ttl, Duration::from_secs(300));
        assert_eq!(config.quota_source_ttl, Duration::from_secs(3600));
        assert!(config.claim_lease < config.coalesce_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::default()
            .with_aggregate_ttl(Duration::from_secs(60))
            .with_claim_lease(Duration::from_secs(5))
            .with_coalesce_timeout(Duration::from_secs(8))
            .with_instance_id("worker-7");

        assert_eq!(config.ttl_for(false), Duration::from_secs(60));
        assert_eq!(config.ttl_for(true), Duration::from_secs(3600));
        assert_eq!(config.instance_id.as_deref(), Some("worker-7"));
        assert_eq!(config.follower_wait(), Duration::from_secs(13));
    }

    #[test]
    fn test_lease_longer_than_timeout_rejected() {
        let config = CacheConfig::default().with_claim_lease(Duration::from_secs(60));
        assert!(config.validate().is_err());
    }
}
