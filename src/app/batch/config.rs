//! Batch queue configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::batch;

/// Configuration for the batch queue and its drain cycles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Interval between scheduled drain cycles
    pub interval: Duration,
    /// Queued requests executed per cycle
    pub max_requests: usize,
    /// Failed attempts before an entry is dropped
    pub max_attempts: u32,
    /// Lease on the cycle lock
    pub cycle_lock_ttl: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval: batch::DEFAULT_INTERVAL,
            max_requests: batch::DEFAULT_MAX_REQUESTS,
            max_attempts: batch::DEFAULT_MAX_ATTEMPTS,
            cycle_lock_ttl: batch::CYCLE_LOCK_TTL,
        }
    }
}

impl BatchConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_cycle_lock_ttl(mut self, ttl: Duration) -> Self {
        self.cycle_lock_ttl = ttl;
        self
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.max_requests == 0 {
            return Err("max_requests must be greater than 0".to_string());
        }
        if self.interval.is_zero() {
            return Err("interval must be non-zero".to_string());
        }
        if self.cycle_lock_ttl.is_zero() {
            return Err("cycle_lock_ttl must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.cycle_lock_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(BatchConfig::default().with_max_attempts(0).validate().is_err());
        assert!(BatchConfig::default().with_max_requests(0).validate().is_err());
    }
}
