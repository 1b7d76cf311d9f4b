//! In-flight fetch claims
//!
//! A claim marks one process as the owner of the upstream fetch for a
//! fingerprint. It is created with a compare-and-set carrying a lease TTL, so
//! a crashed owner's claim expires on its own, and released with a
//! compare-and-delete so an owner never removes a claim it no longer holds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use crate::errors::StoreError;

/// Outcome of looking up or claiming a fingerprint
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimStatus {
    /// A fresh entry is already cached
    Cached(CacheEntry),
    /// This caller now owns the fetch
    Claimed(InFlightClaim),
    /// Another process owns the fetch
    ClaimedByOther { holder: String },
}

/// Identity stored under `jobs:inflight:{fingerprint}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightClaim {
    /// Process instance that owns the fetch
    pub instance_id: String,
    /// Unique per claim so a process never releases its own older claim
    pub token: String,
    pub claimed_at: DateTime<Utc>,
}

impl InFlightClaim {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            token: format!("{:016x}", fastrand::u64(..)),
            claimed_at: Utc::now(),
        }
    }

    /// Value written to the store; compared byte-for-byte on release
    pub fn encode(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// `instance_id/token`, for logs
    pub fn holder(&self) -> String {
        format!("{}/{}", self.instance_id, self.token)
    }

    /// Whether the lease has run out
    pub fn is_expired(&self, lease: Duration) -> bool {
        let elapsed = Utc::now()
            .signed_duration_since(self.claimed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        elapsed >= lease
    }
}

/// Random identity for this process
pub fn generate_instance_id() -> String {
    format!("{}-{:08x}", std::process::id(), fastrand::u32(..))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_are_unique() {
        let a = InFlightClaim::new("proc-1");
        let b = InFlightClaim::new("proc-1");
        assert_ne!(a.token, b.token);
        assert_ne!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn test_encode_decode() {
        let claim = InFlightClaim::new("proc-1");
        let back = InFlightClaim::decode(&claim.encode().unwrap()).unwrap();
        assert_eq!(back, claim);
        assert!(back.holder().starts_with("proc-1/"));
    }

    #[test]
    fn test_lease_expiry() {
        let mut claim = InFlightClaim::new("proc-1");
        assert!(!claim.is_expired(Duration::from_secs(20)));

        claim.claimed_at = Utc::now() - chrono::Duration::seconds(21);
        assert!(claim.is_expired(Duration::from_secs(20)));
    }
}
