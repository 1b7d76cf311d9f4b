//! Configuration management for the job aggregator
//!
//! This module provides unified configuration management with automatic
//! first-run initialization, multi-source loading, and zero-config defaults.
//! The TOML file uses plain seconds/milliseconds; the `*Toml` mirrors convert
//! into the runtime configuration types.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{
    AggregatorConfig, BatchConfig, CacheConfig, ClientConfig, EngineConfig, InMemoryStore,
    PopularQuery, SchedulerConfig, SourceSettings, StoreHandle,
};
use crate::constants::{aggregator, batch, cache, env, http, limits, scheduler};
use crate::errors::{AppError, ConfigError, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shared store settings
    pub store: StoreConfigToml,
    /// HTTP client settings
    pub client: ClientConfigToml,
    /// Shared rate limiting
    pub rate_limit: RateLimitConfigToml,
    /// Fan-out settings
    pub aggregator: AggregatorConfigToml,
    /// Cache and coalescing settings
    pub cache: CacheConfigToml,
    /// Batch queue settings
    pub batch: BatchConfigToml,
    /// Background loop settings
    pub scheduler: SchedulerConfigToml,
    /// Registered sources, in merge order
    pub sources: Vec<SourceSettings>,
    /// Queries kept warm by the scheduler
    pub popular_queries: Vec<PopularQuery>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfigToml::default(),
            client: ClientConfigToml::default(),
            rate_limit: RateLimitConfigToml::default(),
            aggregator: AggregatorConfigToml::default(),
            cache: CacheConfigToml::default(),
            batch: BatchConfigToml::default(),
            scheduler: SchedulerConfigToml::default(),
            sources: SourceSettings::defaults(),
            popular_queries: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Which shared store backs coordination state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; coordination does not span processes
    Memory,
    /// Redis, shared by every worker process
    Redis,
}

/// TOML-friendly store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfigToml {
    pub backend: StoreBackend,
    /// Redis URL (overridden by `JOB_AGGREGATOR_REDIS_URL`)
    pub url: String,
    /// Identity of this process in in-flight claims (generated if unset)
    pub instance_id: Option<String>,
}

impl Default for StoreConfigToml {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            instance_id: None,
        }
    }
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfigToml {
    /// TCP keep-alive timeout in seconds (None = disabled)
    pub tcp_keepalive_secs: Option<u64>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout in seconds (None = no timeout)
    pub pool_idle_timeout_secs: Option<u64>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Local smoothing limit per adapter (requests per second)
    pub rate_limit_rps: u32,
    /// Retries on 429/503/transport errors
    pub max_retries: u32,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            tcp_keepalive_secs: Some(30),
            tcp_nodelay: true,
            pool_idle_timeout_secs: Some(http::POOL_IDLE_TIMEOUT.as_secs()),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout_secs: http::DEFAULT_TIMEOUT.as_secs(),
            connect_timeout_secs: http::CONNECT_TIMEOUT.as_secs(),
            rate_limit_rps: limits::LOCAL_BURST_RPS,
            max_retries: limits::MAX_RETRIES,
        }
    }
}

/// TOML-friendly rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfigToml {
    /// Window length in seconds
    pub window_secs: u64,
    /// Requests per window for sources without their own limit
    pub default_requests_per_minute: u32,
}

impl Default for RateLimitConfigToml {
    fn default() -> Self {
        Self {
            window_secs: limits::RATE_LIMIT_WINDOW.as_secs(),
            default_requests_per_minute: limits::DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

/// TOML-friendly aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfigToml {
    pub max_concurrency: usize,
    pub source_timeout_secs: u64,
    pub limit_per_source: usize,
    pub max_results: usize,
}

impl Default for AggregatorConfigToml {
    fn default() -> Self {
        Self {
            max_concurrency: aggregator::DEFAULT_MAX_CONCURRENCY,
            source_timeout_secs: aggregator::DEFAULT_SOURCE_TIMEOUT.as_secs(),
            limit_per_source: aggregator::DEFAULT_LIMIT_PER_SOURCE,
            max_results: aggregator::DEFAULT_MAX_RESULTS,
        }
    }
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigToml {
    pub aggregate_ttl_secs: u64,
    pub quota_source_ttl_secs: u64,
    pub claim_lease_secs: u64,
    pub coalesce_timeout_secs: u64,
    pub release_grace_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            aggregate_ttl_secs: cache::AGGREGATE_TTL.as_secs(),
            quota_source_ttl_secs: cache::QUOTA_SOURCE_TTL.as_secs(),
            claim_lease_secs: cache::CLAIM_LEASE.as_secs(),
            coalesce_timeout_secs: cache::COALESCE_TIMEOUT.as_secs(),
            release_grace_ms: cache::RELEASE_GRACE.as_millis() as u64,
            poll_interval_ms: cache::REMOTE_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

/// TOML-friendly batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfigToml {
    pub interval_secs: u64,
    pub max_requests: usize,
    pub max_attempts: u32,
    pub cycle_lock_ttl_secs: u64,
}

impl Default for BatchConfigToml {
    fn default() -> Self {
        Self {
            interval_secs: batch::DEFAULT_INTERVAL.as_secs(),
            max_requests: batch::DEFAULT_MAX_REQUESTS,
            max_attempts: batch::DEFAULT_MAX_ATTEMPTS,
            cycle_lock_ttl_secs: batch::CYCLE_LOCK_TTL.as_secs(),
        }
    }
}

/// TOML-friendly scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigToml {
    pub warm_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfigToml {
    fn default() -> Self {
        Self {
            warm_interval_secs: scheduler::WARM_INTERVAL.as_secs(),
            cleanup_interval_secs: scheduler::CLEANUP_INTERVAL.as_secs(),
            shutdown_timeout_secs: scheduler::TASK_SHUTDOWN_TIMEOUT.as_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Runtime configuration for the search engine
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut cache = self.cache.to_runtime_config();
        cache.instance_id = self.store.instance_id.clone();

        EngineConfig {
            aggregator: self.aggregator.to_runtime_config(),
            cache,
            batch: self.batch.to_runtime_config(),
            rate_limit_window: Duration::from_secs(self.rate_limit.window_secs),
            default_rate_limit: self.rate_limit.default_requests_per_minute,
            popular_queries: self.popular_queries.clone(),
        }
    }

    /// Runtime configuration for adapter HTTP clients
    pub fn to_client_config(&self) -> ClientConfig {
        self.client.to_runtime_config()
    }

    /// Runtime configuration for the background loops
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_interval: Duration::from_secs(self.batch.interval_secs),
            warm_interval: Duration::from_secs(self.scheduler.warm_interval_secs),
            cleanup_interval: Duration::from_secs(self.scheduler.cleanup_interval_secs),
            shutdown_timeout: Duration::from_secs(self.scheduler.shutdown_timeout_secs),
        }
    }

    /// Check values that would make the engine misbehave
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.rate_limit.window_secs == 0 {
            errors.push("rate_limit.window_secs must be greater than 0".to_string());
        }
        if self.rate_limit.default_requests_per_minute == 0 {
            errors.push("rate_limit.default_requests_per_minute must be greater than 0".to_string());
        }
        if self.aggregator.max_concurrency == 0 {
            errors.push("aggregator.max_concurrency must be greater than 0".to_string());
        }
        if let Err(e) = self.cache.to_runtime_config().validate() {
            errors.push(format!("cache: {}", e));
        }
        if let Err(e) = self.batch.to_runtime_config().validate() {
            errors.push(format!("batch: {}", e));
        }
        if self.aggregator.source_timeout_secs >= self.cache.claim_lease_secs {
            errors.push(
                "aggregator.source_timeout_secs must be shorter than cache.claim_lease_secs"
                    .to_string(),
            );
        }
        if self.aggregator.source_timeout_secs >= self.batch.cycle_lock_ttl_secs {
            errors.push(
                "aggregator.source_timeout_secs must be shorter than batch.cycle_lock_ttl_secs"
                    .to_string(),
            );
        }
        for source in &self.sources {
            if source.requests_per_minute == Some(0) {
                errors.push(format!("sources.{}: requests_per_minute must be non-zero", source.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }

    /// Connect the configured shared store
    pub async fn connect_store(&self) -> Result<StoreHandle> {
        match self.store.backend {
            StoreBackend::Memory => {
                info!("Using in-process store; coordination is limited to this process");
                Ok(Arc::new(InMemoryStore::new()))
            }
            #[cfg(feature = "redis")]
            StoreBackend::Redis => {
                let url = std::env::var(env::REDIS_URL).unwrap_or_else(|_| self.store.url.clone());
                let store = crate::app::store::RedisStore::connect(&url).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "redis"))]
            StoreBackend::Redis => Err(ConfigError::InvalidValue {
                field: "store.backend".to_string(),
                value: "redis".to_string(),
                reason: format!(
                    "this build has no Redis support; rebuild with --features redis or unset {}",
                    env::REDIS_URL
                ),
            }
            .into()),
        }
    }

    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (if exists)
    /// 3. Environment variables
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        let config_path = if let Some(ref path) = config_file_override {
            Some(path.clone())
        } else {
            Self::find_config_file().await?
        };

        if let Some(path) = config_path {
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                config = Self::load_from_file(&path).await?;
            } else if config_file_override.is_some() {
                return Err(ConfigError::NotFound { path }.into());
            }
        }

        if std::env::var(env::REDIS_URL).is_ok() {
            debug!("{} set, using the Redis store", env::REDIS_URL);
            config.store.backend = StoreBackend::Redis;
        }

        config.validate()?;
        Ok(config)
    }

    /// Initialize configuration on first run
    ///
    /// Creates a default config file if none exists and notifies the user
    pub async fn initialize_first_run() -> Result<Option<PathBuf>> {
        let config_path = Self::get_default_config_path()?;

        if config_path.exists() {
            return Ok(Some(config_path));
        }

        info!("Creating default configuration file...");
        Self::write_default_config(&config_path).await?;

        println!("📁 Created default configuration file:");
        println!("   {}", config_path.display());
        println!("   You can customize settings by editing this file.");
        println!();

        Ok(Some(config_path))
    }

    /// Write the commented default configuration to `path`
    pub async fn write_default_config(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::generic(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(path, Self::generate_default_config_content())
            .await
            .map_err(|e| {
                AppError::generic(format!(
                    "Failed to write config file {}: {}",
                    path.display(),
                    e
                ))
            })
    }

    /// Find configuration file in standard locations
    async fn find_config_file() -> Result<Option<PathBuf>> {
        let search_paths = vec![
            // Project-local config
            PathBuf::from("./job-aggregator.toml"),
            PathBuf::from("./config.toml"),
            // User config
            Self::get_default_config_path()?,
            // System config (Unix only)
            #[cfg(unix)]
            PathBuf::from("/etc/job-aggregator/config.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Ok(Some(path));
            }
        }

        debug!("No config file found in standard locations");
        Ok(None)
    }

    /// Get the default config file path for the current user
    pub fn get_default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;

        Ok(config_dir.join("job-aggregator").join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::generic(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::InvalidFormat)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    fn generate_default_config_content() -> String {
        format!(
            r#"# Job Aggregator Configuration
# This file was automatically generated on first run.
# You can customize any of these settings to suit your needs.

[store]
# "memory" keeps coordination inside one process; use "redis" for several
# worker processes (requires a build with the redis feature)
backend = "memory"
url = "redis://127.0.0.1:6379"
# instance_id = "worker-1"  # Identity in in-flight claims (generated if unset)

[client]
# HTTP client settings, one client per source
tcp_keepalive_secs = 30
tcp_nodelay = true
pool_idle_timeout_secs = 90
pool_max_per_host = {pool}
request_timeout_secs = {timeout}
connect_timeout_secs = 5
rate_limit_rps = {rps}
max_retries = {retries}

[rate_limit]
# Shared fixed-window limits
window_secs = 60
default_requests_per_minute = {rpm}

[aggregator]
max_concurrency = {concurrency}
source_timeout_secs = 15
limit_per_source = 20
max_results = 200

[cache]
aggregate_ttl_secs = 300
# Also the TTL of batch results for quota-constrained sources
quota_source_ttl_secs = 3600
# source_timeout_secs < claim_lease_secs < coalesce_timeout_secs
claim_lease_secs = 20
coalesce_timeout_secs = 30
release_grace_ms = 2000
poll_interval_ms = 100

[batch]
# Drain cycle for quota-constrained sources
interval_secs = 3600
max_requests = 50
max_attempts = 3
cycle_lock_ttl_secs = 600

[scheduler]
warm_interval_secs = 900
cleanup_interval_secs = 120
shutdown_timeout_secs = 5

[logging]
level = "info"  # error, warn, info, debug, trace

# Sources are merged in the order listed. Adzuna and JSearch need API keys
# (ADZUNA_APP_ID / ADZUNA_APP_KEY, JSEARCH_API_KEY) and are skipped without them.
[[sources]]
name = "remotive"

[[sources]]
name = "arbeitnow"

[[sources]]
name = "themuse"

[[sources]]
name = "adzuna"
country = "gb"

[[sources]]
name = "jsearch"

# Queries refreshed by the scheduler before they expire
# [[popular_queries]]
# keywords = ["python", "developer"]
# location = "india"
"#,
            pool = http::POOL_MAX_PER_HOST,
            timeout = http::DEFAULT_TIMEOUT.as_secs(),
            rps = limits::LOCAL_BURST_RPS,
            retries = limits::MAX_RETRIES,
            rpm = limits::DEFAULT_REQUESTS_PER_MINUTE,
            concurrency = aggregator::DEFAULT_MAX_CONCURRENCY,
        )
    }
}

impl ClientConfigToml {
    /// Convert to runtime ClientConfig
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            tcp_keepalive: self.tcp_keepalive_secs.map(Duration::from_secs),
            tcp_nodelay: self.tcp_nodelay,
            pool_idle_timeout: self.pool_idle_timeout_secs.map(Duration::from_secs),
            pool_max_per_host: self.pool_max_per_host,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            rate_limit_rps: self.rate_limit_rps,
            max_retries: self.max_retries,
        }
    }
}

impl AggregatorConfigToml {
    /// Convert to runtime AggregatorConfig
    pub fn to_runtime_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            max_concurrency: self.max_concurrency,
            source_timeout: Duration::from_secs(self.source_timeout_secs),
            limit_per_source: self.limit_per_source,
            max_results: self.max_results,
        }
    }
}

impl CacheConfigToml {
    /// Convert to runtime CacheConfig
    pub fn to_runtime_config(&self) -> CacheConfig {
        CacheConfig {
            aggregate_ttl: Duration::from_secs(self.aggregate_ttl_secs),
            quota_source_ttl: Duration::from_secs(self.quota_source_ttl_secs),
            claim_lease: Duration::from_secs(self.claim_lease_secs),
            coalesce_timeout: Duration::from_secs(self.coalesce_timeout_secs),
            release_grace: Duration::from_millis(self.release_grace_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            instance_id: None,
        }
    }
}

impl BatchConfigToml {
    /// Convert to runtime BatchConfig
    pub fn to_runtime_config(&self) -> BatchConfig {
        BatchConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_requests: self.max_requests,
            max_attempts: self.max_attempts,
            cycle_lock_ttl: Duration::from_secs(self.cycle_lock_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_config_creation() {
        let config = AppConfig::default();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.sources.len(), 5);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());

        let engine = config.to_engine_config();
        assert_eq!(engine.cache.aggregate_ttl, Duration::from_secs(300));
        assert_eq!(engine.cache.ttl_for(true), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_config_file_generation() {
        let content = AppConfig::generate_default_config_content();

        // Should be valid TOML
        let parsed: AppConfig = toml::from_str(&content).unwrap();

        assert_eq!(parsed.client.max_retries, limits::MAX_RETRIES);
        assert_eq!(parsed.sources[0].name, "remotive");
        assert_eq!(parsed.sources[3].country.as_deref(), Some("gb"));
        assert!(parsed.validate().is_ok());
        assert!(content.contains("# Job Aggregator Configuration"));
    }

    #[tokio::test]
    async fn test_config_loading_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let result = AppConfig::load(Some(config_path)).await;
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");

        let test_config = r#"
[aggregator]
max_concurrency = 4

[logging]
level = "debug"

[[sources]]
name = "remotive"
requests_per_minute = 10

[[popular_queries]]
keywords = ["rust"]
location = "remote"
"#;
        tokio::fs::write(&config_path, test_config).await.unwrap();

        let config = AppConfig::load(Some(config_path)).await.unwrap();
        assert_eq!(config.aggregator.max_concurrency, 4);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].requests_per_minute, Some(10));
        assert_eq!(config.popular_queries.len(), 1);

        // Unspecified sections fall back to defaults
        assert_eq!(config.cache.claim_lease_secs, 20);
        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[tokio::test]
    async fn test_invalid_lease_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.toml");
        tokio::fs::write(
            &config_path,
            "[cache]\nclaim_lease_secs = 60\ncoalesce_timeout_secs = 30\n",
        )
        .await
        .unwrap();

        let result = AppConfig::load(Some(config_path)).await;
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::ValidationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_source_timeout_longer_than_lease_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("slow.toml");
        tokio::fs::write(&config_path, "[aggregator]\nsource_timeout_secs = 20\n")
            .await
            .unwrap();

        let result = AppConfig::load(Some(config_path)).await;
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::ValidationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_write_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        AppConfig::write_default_config(&path).await.unwrap();
        let loaded = AppConfig::load(Some(path)).await.unwrap();
        assert_eq!(loaded.batch.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_memory_store_connects() {
        let store = AppConfig::default().connect_store().await.unwrap();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
