//! Configuration management for Turnstile.
//!
//! The limiter itself never reads configuration; the binary (or any other
//! embedding) loads a [`TurnstileConfig`] and hands the relevant pieces to
//! the constructors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::StrategyKind;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Parameters of the active strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Which algorithm to run
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Events allowed per interval
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Window length in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Threshold for the token and leaky strategies; falls back to `rate`
    #[serde(default = "default_burst")]
    pub burst: Option<u64>,

    /// Namespace prepended to every store key
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            rate: default_rate(),
            interval_secs: default_interval_secs(),
            burst: default_burst(),
            key_namespace: default_key_namespace(),
        }
    }
}

fn default_rate() -> u64 {
    5
}

fn default_interval_secs() -> u64 {
    1
}

fn default_burst() -> Option<u64> {
    Some(5)
}

fn default_key_namespace() -> String {
    "rate:limiter:".to_string()
}

/// Counter store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StoreBackend {
    /// Process-local store
    #[default]
    Memory,
    /// Shared Redis server
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(TurnstileError::Config(format!(
                "unknown store backend: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for StoreBackend {
    type Error = TurnstileError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<StoreBackend> for String {
    fn from(backend: StoreBackend) -> Self {
        match backend {
            StoreBackend::Memory => "memory".to_string(),
            StoreBackend::Redis => "redis".to_string(),
        }
    }
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Backend to use
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis server URL, used by the redis backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log line format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults, an optional YAML file and the environment.
    ///
    /// Later sources win. Environment variables use the `TURNSTILE_` prefix and
    /// `__` between sections, e.g. `TURNSTILE_LIMITER__RATE=10`.
    ///
    /// The result is not validated, so callers can layer their own overrides
    /// first and then call [`TurnstileConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TurnstileConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Check the configuration for values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;

        if self.store.backend == StoreBackend::Redis && !cfg!(feature = "redis") {
            return Err(TurnstileError::Config(
                "the redis store backend requires the `redis` feature".to_string(),
            ));
        }

        Ok(())
    }
}

impl LimiterSettings {
    /// Check that the strategy parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(TurnstileError::Config(
                "interval_secs must be at least 1".to_string(),
            ));
        }

        if self.key_namespace.is_empty() {
            return Err(TurnstileError::Config(
                "key_namespace must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
