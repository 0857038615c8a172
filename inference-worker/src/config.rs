//! Configuration for the inference worker.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use docchat_common::{StreamConfig, TransportConfig};
use serde::Deserialize;

/// Main configuration structure for the inference worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub streams: StreamConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Provider used when a model carries no known `provider/` prefix.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// OpenAI-compatible providers keyed by name (the model prefix).
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Loop tuning for each worker.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Number of workers in this process.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// How long a read waits for a request. 0 blocks until one arrives.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// Pause after an empty read.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    /// Pause after a transport error.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl WorkerSettings {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            block_ms: default_block_ms(),
            idle_delay_ms: default_idle_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// An OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Literal API key. Takes precedence over `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// API key from config, falling back to the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.is_empty())
        })
    }
}

// Default values
fn default_provider() -> String {
    "openai".to_string()
}
fn default_concurrency() -> usize {
    1
}
fn default_block_ms() -> u64 {
    5000
}
fn default_idle_delay_ms() -> u64 {
    1000
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_provider_timeout() -> u64 {
    120
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (WORKER__SECTION__KEY format)
    /// 2. worker.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            // Set defaults
            .set_default("default_provider", default_provider())?
            .set_default("providers.openai.base_url", "https://api.openai.com/v1")?
            .set_default("providers.openai.api_key_env", "OPENAI_API_KEY")?
            .set_default(
                "providers.gemini.base_url",
                "https://generativelanguage.googleapis.com/v1beta/openai",
            )?
            .set_default("providers.gemini.api_key_env", "GEMINI_API_KEY")?
            // Load from worker.toml if exists
            .add_source(File::with_name("worker").required(false))
            // Override with environment variables (WORKER__SECTION__KEY format)
            .add_source(
                Environment::with_prefix("WORKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
