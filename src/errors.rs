//! Error types for the job aggregator
//!
//! This module defines the error taxonomy for every subsystem of the engine.
//! Most of these errors are *degradations* rather than failures: upstream and
//! store errors are logged and absorbed so that a search always produces a
//! best-effort result. Only configuration errors are fatal, and only at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by an upstream source adapter
#[derive(Error, Debug)]
pub enum SourceError {
    /// HTTP transport failure (connect, TLS, body read)
    #[error("HTTP request to {source_name} failed")]
    Http {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },

    /// Upstream answered with a non-success status
    #[error("{source_name} responded with HTTP {status}")]
    Status { source_name: String, status: u16 },

    /// Request exceeded the per-source timeout
    #[error("{source_name} timed out after {millis} ms")]
    Timeout { source_name: String, millis: u64 },

    /// Upstream payload could not be decoded
    #[error("Could not decode {source_name} response: {reason}")]
    Decode { source_name: String, reason: String },

    /// Upstream throttled us and retries were exhausted
    #[error("{source_name} rate limit exceeded (HTTP 429)")]
    Throttled { source_name: String },

    /// Adapter is misconfigured (missing API key, invalid endpoint). This is a
    /// programmer/deployment error and is never absorbed.
    #[error("Source {source_name} is misconfigured: {reason}")]
    Misconfigured { source_name: String, reason: String },
}

impl SourceError {
    /// Whether this failure is a transient upstream condition
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SourceError::Misconfigured { .. })
    }

    /// Name of the source that produced the error
    pub fn source_name(&self) -> &str {
        match self {
            SourceError::Http { source_name, .. }
            | SourceError::Status { source_name, .. }
            | SourceError::Timeout { source_name, .. }
            | SourceError::Decode { source_name, .. }
            | SourceError::Throttled { source_name }
            | SourceError::Misconfigured { source_name, .. } => source_name,
        }
    }
}

/// Shared key/value store errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Shared store unavailable: {reason}")]
    Unavailable { reason: String },

    /// A command was rejected by the store
    #[error("Store command {command} failed: {reason}")]
    Command { command: String, reason: String },

    /// Stored value could not be (de)serialized
    #[error("Could not (de)serialize value for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// Value held at key has the wrong type for the operation
    #[error("Value at {key} has the wrong type for {operation}")]
    WrongType { key: String, operation: String },
}

/// Rate limiting errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Source window quota exhausted
    #[error("Rate limit exceeded for {source_name}: {limit} requests per window")]
    Exceeded { source_name: String, limit: u32 },

    /// A rate limit of zero was configured
    #[error("Rate limit for {source_name} must be non-zero")]
    ZeroLimit { source_name: String },
}

/// Cache and coalescing errors
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Cache store error (callers fail open on this)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Waited for another owner's fetch longer than the bounded timeout
    #[error("Timed out after {millis} ms waiting for in-flight fetch of {fingerprint}")]
    CoalescerTimeout { fingerprint: String, millis: u64 },

    /// The fetch function failed; shared with coalesced waiters
    #[error("Upstream fetch for {fingerprint} failed: {reason}")]
    UpstreamFailed { fingerprint: String, reason: String },

    /// The owning fetch task terminated without resolving
    #[error("In-flight fetch for {fingerprint} was abandoned")]
    OwnerAbandoned { fingerprint: String },
}

/// Batch queue errors
#[derive(Error, Debug)]
pub enum BatchError {
    /// Queue store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Another process currently drains the queue
    #[error("Batch cycle already in progress (lock held by {holder})")]
    CycleInProgress { holder: String },

    /// Requested source is not registered
    #[error("Unknown source: {source_name}")]
    UnknownSource { source_name: String },

    /// Fetch failed for one queued request
    #[error("Batch fetch for {fingerprint} failed: {reason}")]
    FetchFailed { fingerprint: String, reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Missing required configuration field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Source name in configuration does not match a known adapter
    #[error("Unknown source in configuration: {name}")]
    UnknownSource { name: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Upstream source error
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Shared store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Rate limit error
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Batch queue error
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Source(e) => e.is_recoverable(),
            AppError::Store(_)
            | AppError::RateLimit(RateLimitError::Exceeded { .. })
            | AppError::Cache(_)
            | AppError::Batch(BatchError::CycleInProgress { .. })
            | AppError::Batch(BatchError::FetchFailed { .. })
            | AppError::Batch(BatchError::Store(_)) => true,

            AppError::RateLimit(RateLimitError::ZeroLimit { .. })
            | AppError::Batch(BatchError::UnknownSource { .. })
            | AppError::Config(_) => false,

            _ => false,
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Source(_) => "upstream",
            AppError::Store(_) => "store",
            AppError::RateLimit(_) => "rate_limit",
            AppError::Cache(_) => "cache",
            AppError::Batch(_) => "batch",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Source adapter result type alias
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Batch result type alias
pub type BatchResult<T> = std::result::Result<T, BatchError>;

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization {
            key: "<payload>".to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_recoverability() {
        let timeout = SourceError::Timeout {
            source_name: "remotive".to_string(),
            millis: 1500,
        };
        assert!(timeout.is_recoverable());
        assert_eq!(timeout.source_name(), "remotive");

        let misconfigured = SourceError::Misconfigured {
            source_name: "adzuna".to_string(),
            reason: "missing ADZUNA_APP_ID".to_string(),
        };
        assert!(!misconfigured.is_recoverable());
    }

    #[test]
    fn test_app_error_categories() {
        let store = AppError::from(StoreError::Unavailable {
            reason: "connection refused".to_string(),
        });
        assert_eq!(store.category(), "store");
        assert!(store.is_recoverable());

        let config = AppError::from(ConfigError::UnknownSource {
            name: "monster".to_string(),
        });
        assert_eq!(config.category(), "config");
        assert!(!config.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = CacheError::CoalescerTimeout {
            fingerprint: "abc".to_string(),
            millis: 30_000,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 30000 ms waiting for in-flight fetch of abc"
        );
    }
}
