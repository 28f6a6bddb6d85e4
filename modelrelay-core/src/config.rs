//! Gateway core configuration.
//!
//! Plain serde types covering exactly the inputs the core consumes;
//! loading them from files or the environment is the host process's
//! job. Defaults match production-safe values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level configuration for the gateway core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Outer per-call deadline in seconds
    pub default_timeout_seconds: u64,
    /// Log each timeout event from the timeout wrapper
    pub enable_timeout_logging: bool,
    /// Log each retry attempt from the retry wrapper
    pub enable_retry_logging: bool,
    /// Maximum retry attempts after the first try
    pub max_retries: u32,
    /// First retry delay in seconds
    pub initial_delay_seconds: f64,
    /// Retry delay clamp in seconds
    pub max_delay_seconds: f64,
    /// Connection pool sizing and lifecycle
    pub pool: PoolConfig,
    /// Response cache behavior
    pub cache: CacheSettings,
    /// Context-management hint handed to request builders
    pub default_max_context_tokens: Option<u32>,
    /// Connection string for the persistence collaborator; opaque here
    pub database_url: Option<DatabaseUrl>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            enable_timeout_logging: true,
            enable_retry_logging: true,
            max_retries: 3,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 30.0,
            pool: PoolConfig::default(),
            cache: CacheSettings::default(),
            default_max_context_tokens: None,
            database_url: None,
        }
    }
}

impl GatewayConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs_f64(self.initial_delay_seconds)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay_seconds)
    }
}

/// Per-provider connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections_per_provider: usize,
    /// Connections older than this are never reused
    pub max_connection_age_seconds: u64,
    /// Idle connections beyond this are evicted by the cleanup timer
    pub max_idle_seconds: u64,
    pub connection_timeout_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_provider: 10,
            max_connection_age_seconds: 300,
            max_idle_seconds: 60,
            connection_timeout_seconds: 10,
        }
    }
}

impl PoolConfig {
    pub fn max_connection_age(&self) -> Duration {
        Duration::from_secs(self.max_connection_age_seconds)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_seconds)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

/// Cache eligibility override for a single logical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBehavior {
    /// Follow the global `is_enabled` flag
    #[default]
    Default,
    /// Cache even when globally disabled
    Always,
    /// Never cache this model
    Never,
}

/// Per-model cache override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCacheOverride {
    pub behavior: CacheBehavior,
    /// TTL override in minutes
    pub ttl_minutes: Option<u64>,
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub is_enabled: bool,
    pub default_ttl_minutes: u64,
    pub max_entries: usize,
    /// Per-model overrides keyed by logical model alias
    pub model_overrides: HashMap<String, ModelCacheOverride>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            is_enabled: true,
            default_ttl_minutes: 60,
            max_entries: 10_000,
            model_overrides: HashMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_minutes * 60)
    }

    /// Whether responses for `alias` should be cached.
    pub fn is_enabled_for(&self, alias: &str) -> bool {
        match self.model_overrides.get(alias).map(|o| o.behavior) {
            Some(CacheBehavior::Always) => true,
            Some(CacheBehavior::Never) => false,
            _ => self.is_enabled,
        }
    }

    /// Effective TTL for `alias`, honoring the per-model override.
    pub fn ttl_for(&self, alias: &str) -> Duration {
        self.model_overrides
            .get(alias)
            .and_then(|o| o.ttl_minutes)
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or_else(|| self.default_ttl())
    }
}

/// A validated postgres connection string.
///
/// The core only checks the scheme and preserves the URL verbatim,
/// query parameters included, for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatabaseUrl {
    raw: String,
}

impl DatabaseUrl {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let scheme_end = raw
            .find("://")
            .ok_or_else(|| format!("database url has no scheme: {raw}"))?;
        let scheme = &raw[..scheme_end];
        if scheme != "postgres" && scheme != "postgresql" {
            return Err(format!("unsupported database scheme: {scheme}"));
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The query string, preserved verbatim.
    pub fn query(&self) -> Option<&str> {
        self.raw.split_once('?').map(|(_, q)| q)
    }
}

impl TryFrom<String> for DatabaseUrl {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DatabaseUrl::parse(&value)
    }
}

impl From<DatabaseUrl> for String {
    fn from(value: DatabaseUrl) -> Self {
        value.raw
    }
}
