//! Closed registry of source adapters
//!
//! Adapters are instantiated from configuration by [`SourceKind`]; a name
//! that does not match a known kind is a startup error. Registration order is
//! preserved and is the order in which the aggregator merges results.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::adzuna::AdzunaSource;
use super::arbeitnow::ArbeitnowSource;
use super::config::ClientConfig;
use super::jsearch::JSearchSource;
use super::remotive::RemotiveSource;
use super::simulated::SimulatedSource;
use super::themuse::TheMuseSource;
use super::SourceAdapter;
use crate::app::rate_limiter::RateLimiter;
use crate::app::store::StoreHandle;
use crate::errors::{ConfigError, RateLimitError, SourceError};

/// Every adapter variant the engine knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Adzuna,
    JSearch,
    Remotive,
    Arbeitnow,
    TheMuse,
    Simulated,
}

impl SourceKind {
    /// The production upstreams, in default merge order
    pub fn upstreams() -> [SourceKind; 5] {
        [
            SourceKind::Remotive,
            SourceKind::Arbeitnow,
            SourceKind::TheMuse,
            SourceKind::Adzuna,
            SourceKind::JSearch,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Adzuna => super::adzuna::NAME,
            SourceKind::JSearch => super::jsearch::NAME,
            SourceKind::Remotive => super::remotive::NAME,
            SourceKind::Arbeitnow => super::arbeitnow::NAME,
            SourceKind::TheMuse => super::themuse::NAME,
            SourceKind::Simulated => "simulated",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "adzuna" => Ok(SourceKind::Adzuna),
            "jsearch" => Ok(SourceKind::JSearch),
            "remotive" => Ok(SourceKind::Remotive),
            "arbeitnow" => Ok(SourceKind::Arbeitnow),
            "themuse" | "the_muse" | "muse" => Ok(SourceKind::TheMuse),
            "simulated" => Ok(SourceKind::Simulated),
            other => Err(ConfigError::UnknownSource {
                name: other.to_string(),
            }),
        }
    }
}

/// Configuration for one registered source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Override the adapter's own requests-per-minute limit
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    /// Country code for sources that partition by country (Adzuna)
    #[serde(default)]
    pub country: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            requests_per_minute: None,
            country: None,
        }
    }

    /// Settings for every production upstream
    pub fn defaults() -> Vec<SourceSettings> {
        SourceKind::upstreams()
            .iter()
            .map(|kind| SourceSettings::new(kind.as_str()))
            .collect()
    }
}

/// Ordered, closed set of source adapters
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters from configuration
    ///
    /// Unknown names are rejected. Adapters that cannot be built because
    /// their credentials are missing are skipped with a warning so a
    /// deployment without paid keys still serves the public sources.
    pub fn from_settings(
        settings: &[SourceSettings],
        client: &ClientConfig,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for entry in settings.iter().filter(|s| s.enabled) {
            let kind: SourceKind = entry.name.parse()?;
            match Self::build(kind, entry, client) {
                Ok(adapter) => registry.register(adapter)?,
                Err(SourceError::Misconfigured { reason, .. }) => {
                    warn!("Source {} disabled: {}", kind, reason);
                }
                Err(e) => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("sources.{}", entry.name),
                        value: entry.name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        info!(
            "Registered {} sources: {}",
            registry.len(),
            registry.names().join(", ")
        );
        Ok(registry)
    }

    fn build(
        kind: SourceKind,
        settings: &SourceSettings,
        client: &ClientConfig,
    ) -> Result<Arc<dyn SourceAdapter>, SourceError> {
        let rpm = settings.requests_per_minute;
        let adapter: Arc<dyn SourceAdapter> = match kind {
            SourceKind::Adzuna => {
                let source = AdzunaSource::from_env(client, settings.country.clone())?;
                Arc::new(match rpm {
                    Some(rpm) => source.with_rate_limit(rpm),
                    None => source,
                })
            }
            SourceKind::JSearch => {
                let source = JSearchSource::from_env(client)?;
                Arc::new(match rpm {
                    Some(rpm) => source.with_rate_limit(rpm),
                    None => source,
                })
            }
            SourceKind::Remotive => {
                let source = RemotiveSource::new(client)?;
                Arc::new(match rpm {
                    Some(rpm) => source.with_rate_limit(rpm),
                    None => source,
                })
            }
            SourceKind::Arbeitnow => {
                let source = ArbeitnowSource::new(client)?;
                Arc::new(match rpm {
                    Some(rpm) => source.with_rate_limit(rpm),
                    None => source,
                })
            }
            SourceKind::TheMuse => {
                let source = TheMuseSource::new(client)?;
                Arc::new(match rpm {
                    Some(rpm) => source.with_rate_limit(rpm),
                    None => source,
                })
            }
            SourceKind::Simulated => {
                let source = SimulatedSource::new(settings.name.clone());
                Arc::new(match rpm {
                    Some(rpm) => source.with_rate_limit(rpm),
                    None => source,
                })
            }
        };
        Ok(adapter)
    }

    /// Add an adapter; names must be unique
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> Result<(), ConfigError> {
        if self.get(adapter.name()).is_some() {
            return Err(ConfigError::InvalidValue {
                field: "sources".to_string(),
                value: adapter.name().to_string(),
                reason: "source registered twice".to_string(),
            });
        }
        self.adapters.push(adapter);
        Ok(())
    }

    /// Builder form of [`SourceRegistry::register`]
    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Result<Self, ConfigError> {
        self.register(adapter)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        let name = name.trim().to_lowercase();
        self.adapters
            .iter()
            .find(|a| a.name().to_lowercase() == name)
            .cloned()
    }

    /// All adapters in registration order
    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    /// Adapters queried by an unfiltered search
    ///
    /// Quota-constrained sources are excluded; they are reached through the
    /// batch queue only.
    pub fn fan_out_adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .filter(|a| !a.is_quota_constrained())
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Whether `name` is a registered quota-constrained source
    pub fn is_quota_constrained(&self, name: &str) -> bool {
        self.get(name)
            .map(|a| a.is_quota_constrained())
            .unwrap_or(false)
    }

    /// Build a rate limiter carrying each adapter's requests-per-minute limit
    pub fn build_rate_limiter(
        &self,
        store: StoreHandle,
        window: std::time::Duration,
        default_limit: u32,
    ) -> Result<RateLimiter, RateLimitError> {
        let mut limiter = RateLimiter::new(store)
            .with_window(window)
            .with_default_limit(default_limit)?;
        for adapter in &self.adapters {
            limiter.set_limit(adapter.name(), adapter.rate_limit())?;
        }
        Ok(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::store::InMemoryStore;
    use std::time::Duration;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("Remotive".parse::<SourceKind>().unwrap(), SourceKind::Remotive);
        assert_eq!("the_muse".parse::<SourceKind>().unwrap(), SourceKind::TheMuse);
        assert!(matches!(
            "monster".parse::<SourceKind>(),
            Err(ConfigError::UnknownSource { .. })
        ));
    }

    #[test]
    fn test_unknown_source_is_config_error() {
        let settings = vec![SourceSettings::new("remotive"), SourceSettings::new("indeed")];
        let result = SourceRegistry::from_settings(&settings, &ClientConfig::default());
        assert!(matches!(result, Err(ConfigError::UnknownSource { name }) if name == "indeed"));
    }

    #[test]
    fn test_public_sources_build_in_order() {
        let mut disabled = SourceSettings::new("arbeitnow");
        disabled.enabled = false;
        let settings = vec![
            SourceSettings::new("themuse"),
            disabled,
            SourceSettings::new("remotive"),
        ];

        let registry = SourceRegistry::from_settings(&settings, &ClientConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["themuse", "remotive"]);
        assert!(!registry.is_quota_constrained("remotive"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = SourceRegistry::new()
            .with(Arc::new(SimulatedSource::new("sim")))
            .unwrap();
        assert!(registry.with(Arc::new(SimulatedSource::new("sim"))).is_err());
    }

    #[test]
    fn test_fan_out_excludes_quota_sources() {
        let registry = SourceRegistry::new()
            .with(Arc::new(SimulatedSource::new("public")))
            .unwrap()
            .with(Arc::new(
                SimulatedSource::new("paid").with_quota_constrained(true),
            ))
            .unwrap();

        let names: Vec<_> = registry
            .fan_out_adapters()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["public"]);
        assert!(registry.is_quota_constrained("paid"));
    }

    #[tokio::test]
    async fn test_rate_limiter_uses_adapter_limits() {
        let registry = SourceRegistry::new()
            .with(Arc::new(SimulatedSource::new("slow").with_rate_limit(2)))
            .unwrap();
        let limiter = registry
            .build_rate_limiter(Arc::new(InMemoryStore::new()), Duration::from_secs(60), 30)
            .unwrap();

        assert_eq!(limiter.limit_for("slow"), 2);
        assert_eq!(limiter.limit_for("other"), 30);
    }
}
