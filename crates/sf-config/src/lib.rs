//! Storefront Webhook Configuration
//!
//! Configuration is read from an optional TOML file, then overridden by
//! `SF_*` environment variables, then validated.
//!
//! ```toml
//! environment = "production"
//!
//! [server]
//! port = 8080
//!
//! [queue]
//! backend = "auto"
//! redis_url = "redis://localhost:6379"
//! max_concurrent = 5
//! max_retries = 3
//! retry_delays_ms = [5000, 15000, 30000]
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; in-memory stores are used when absent
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Queue backend preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Redis when reachable, in-process otherwise
    #[default]
    Auto,
    Redis,
    Memory,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "redis" => Ok(BackendPreference::Redis),
            "memory" | "in-process" => Ok(BackendPreference::Memory),
            other => Err(format!("unknown queue backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: BackendPreference,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub max_concurrent: usize,
    /// Total attempts per job, including the first
    pub max_retries: u32,
    pub retry_delays_ms: Vec<u64>,
    pub poll_interval_ms: u64,
    pub lease_ms: u64,
    pub drain_timeout_ms: u64,
    /// Terminal job statuses kept for status queries (in-process backend)
    pub retained_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            redis_url: None,
            key_prefix: "storefront:webhooks".to_string(),
            max_concurrent: 5,
            max_retries: 3,
            retry_delays_ms: vec![5_000, 15_000, 30_000],
            poll_interval_ms: 250,
            lease_ms: 60_000,
            drain_timeout_ms: 30_000,
            retained_jobs: 1_000,
        }
    }
}

impl QueueConfig {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            user_agent: "StorefrontWebhooks/1.0".to_string(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Minimum delay before a cart reminder is delivered. Defaults depend on
    /// the environment when unset.
    pub cart_reminder_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Per-kind subscription cache lifetime; 0 disables caching
    pub cache_ttl_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { cache_ttl_ms: 10_000 }
    }
}

impl RegistryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

// ============================================================================
// Application Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub delivery: DeliveryConfig,
    pub events: EventsConfig,
    pub registry: RegistryConfig,
}

impl AppConfig {
    /// Load from an optional TOML file, apply `SF_*` overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a key lookup (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Overrides { lookup };

        env.parse("SF_ENVIRONMENT", &mut self.environment)?;
        env.string("SF_HOST", &mut self.server.host);
        env.parse("SF_PORT", &mut self.server.port)?;

        env.optional("SF_DATABASE_URL", &mut self.database.url);
        env.parse("SF_DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections)?;

        env.parse("SF_QUEUE_BACKEND", &mut self.queue.backend)?;
        env.optional("SF_REDIS_URL", &mut self.queue.redis_url);
        env.string("SF_QUEUE_KEY_PREFIX", &mut self.queue.key_prefix);
        env.parse("SF_MAX_CONCURRENT", &mut self.queue.max_concurrent)?;
        env.parse("SF_MAX_RETRIES", &mut self.queue.max_retries)?;
        env.list("SF_RETRY_DELAYS_MS", &mut self.queue.retry_delays_ms)?;
        env.parse("SF_QUEUE_POLL_INTERVAL_MS", &mut self.queue.poll_interval_ms)?;
        env.parse("SF_QUEUE_LEASE_MS", &mut self.queue.lease_ms)?;
        env.parse("SF_DRAIN_TIMEOUT_MS", &mut self.queue.drain_timeout_ms)?;
        env.parse("SF_RETAINED_JOBS", &mut self.queue.retained_jobs)?;

        env.parse("SF_HTTP_TIMEOUT_MS", &mut self.delivery.timeout_ms)?;
        env.string("SF_USER_AGENT", &mut self.delivery.user_agent);

        if let Some(value) = (env.lookup)("SF_CART_REMINDER_DELAY_MS") {
            let parsed = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "SF_CART_REMINDER_DELAY_MS".to_string(),
                value,
            })?;
            self.events.cart_reminder_delay_ms = Some(parsed);
        }

        env.parse("SF_REGISTRY_CACHE_TTL_MS", &mut self.registry.cache_ttl_ms)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_concurrent == 0 {
            return Err(ConfigError::Invalid("queue.max_concurrent must be at least 1".into()));
        }
        if self.queue.max_retries == 0 {
            return Err(ConfigError::Invalid("queue.max_retries must be at least 1".into()));
        }
        if self.queue.retry_delays_ms.is_empty() {
            return Err(ConfigError::Invalid("queue.retry_delays_ms must not be empty".into()));
        }
        if self.delivery.timeout_ms == 0 {
            return Err(ConfigError::Invalid("delivery.timeout_ms must be at least 1".into()));
        }
        if self.queue.backend == BackendPreference::Redis && self.queue.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "queue.backend = \"redis\" requires queue.redis_url".into(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Minimum delay applied to every cart reminder
    pub fn cart_reminder_delay(&self) -> Duration {
        let ms = self.events.cart_reminder_delay_ms.unwrap_or(if self.is_production() {
            3_600_000
        } else {
            60_000
        });
        Duration::from_millis(ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

struct Overrides<F> {
    lookup: F,
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = (self.lookup)(key) {
            *target = value;
        }
    }

    fn optional(&self, key: &str, target: &mut Option<String>) {
        if let Some(value) = (self.lookup)(key) {
            *target = if value.trim().is_empty() { None } else { Some(value) };
        }
    }

    fn parse<T: FromStr>(&self, key: &str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(value) = (self.lookup)(key) {
            *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            })?;
        }
        Ok(())
    }

    fn list(&self, key: &str, target: &mut Vec<u64>) -> Result<(), ConfigError> {
        if let Some(value) = (self.lookup)(key) {
            *target = value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|_| ConfigError::InvalidEnv {
                    key: key.to_string(),
                    value: value.clone(),
                })?;
        }
        Ok(())
    }
}
