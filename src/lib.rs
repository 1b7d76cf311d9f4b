//! Job Aggregator Library
//!
//! Aggregates job listings from many rate-limited upstream job boards into
//! one deduplicated, cached result set. Provides distributed rate limiting,
//! concurrent fan-out with partial-failure tolerance, cross-process request
//! coalescing and a batch queue for quota-constrained sources.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(DEFAULT_MAX_CONCURRENCY, 10);
        assert_eq!(AGGREGATE_TTL.as_secs(), 300);
        assert_eq!(QUOTA_SOURCE_TTL.as_secs(), 3600);
        assert!(USER_AGENT.contains("job-aggregator"));
    }

    #[test]
    fn test_error_types() {
        let config_error = errors::ConfigError::MissingField {
            field: "store.url".to_string(),
        };
        let app_error = AppError::Config(config_error);

        assert_eq!(app_error.category(), "config");
        assert!(!app_error.is_recoverable());
    }
}
