//! Data layer configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fuel_batch::{BatcherOptions, LoaderOptions};
use fuel_cache::{FetchOptions, InMemoryStore};
use fuel_observability::LoggingConfig;
use fuel_transport::{BackoffStrategy, ClientOptions, RetryPolicy, Url};
use serde::{Deserialize, Serialize};

/// Data layer configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataLayerConfig {
    /// Upstream API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Keyed loader settings.
    #[serde(default)]
    pub loader: LoaderOptions,

    /// Windowed batcher settings.
    #[serde(default)]
    pub batcher: BatcherConfig,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DataLayerConfig {
    /// Load and validate config from a file.
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a file, in the format implied by its extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api.base_url)
            .with_context(|| format!("api.base_url is not a valid URL: {}", self.api.base_url))?;

        if self.cache.max_entries == 0 {
            bail!("cache.max_entries must be at least 1");
        }
        if self.batcher.max_batch_size == 0 {
            bail!("batcher.max_batch_size must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Upstream API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the price API, without a trailing `/stations`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP client settings.
    #[serde(flatten)]
    pub client: ClientOptions,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client: ClientOptions::default(),
        }
    }
}

/// Windowed batcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Window length in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Queue length that flushes early; also the most requests per flush.
    #[serde(default = "default_batcher_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_batch_delay_ms() -> u64 {
    10
}

fn default_batcher_max_batch_size() -> usize {
    50
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: default_batch_delay_ms(),
            max_batch_size: default_batcher_max_batch_size(),
        }
    }
}

impl BatcherConfig {
    pub fn options(&self) -> BatcherOptions {
        BatcherOptions::new(Duration::from_millis(self.batch_delay_ms), self.max_batch_size)
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a fetched response stays in the cache.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Most responses the in-memory store holds at once.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> u64 {
    InMemoryStore::DEFAULT_MAX_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::with_ttl(Duration::from_secs(self.ttl_secs))
    }

    pub fn store(&self) -> InMemoryStore {
        InMemoryStore::with_max_capacity(self.max_entries)
    }
}

/// Retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries).with_backoff(BackoffStrategy::Exponential {
            base: Duration::from_millis(self.base_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
        })
    }
}
