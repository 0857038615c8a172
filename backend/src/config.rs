use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use docchat_common::{BlockMode, StreamConfig, TransportConfig};
use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub streams: StreamConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port (default: 8000)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body; uploads arrive base64 encoded (default: 50 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Correlation broker tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// How long a call waits for its response (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Block time of each dispatcher read (default: 1000)
    #[serde(default = "default_poll_block_ms")]
    pub poll_block_ms: u64,
    /// How often the janitor sweeps the pending list (default: 30)
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
    /// Idle time after which a pending response is treated as orphaned (default: 120)
    #[serde(default = "default_orphan_ttl_secs")]
    pub orphan_ttl_secs: u64,
    /// Pause after a failed dispatcher read (default: 1000)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl BrokerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_block(&self) -> BlockMode {
        BlockMode::from_millis(self.poll_block_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_block_ms: default_poll_block_ms(),
            janitor_interval_secs: default_janitor_interval_secs(),
            orphan_ttl_secs: default_orphan_ttl_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the document store (default: ./data)
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    /// Base URL of the document conversion service
    #[serde(default = "default_converter_url")]
    pub base_url: String,
    #[serde(default = "default_converter_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            base_url: default_converter_url(),
            timeout_secs: default_converter_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level, overridden by RUST_LOG (default: info)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_poll_block_ms() -> u64 {
    1000
}
fn default_janitor_interval_secs() -> u64 {
    30
}
fn default_orphan_ttl_secs() -> u64 {
    120
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_storage_root() -> String {
    "./data".to_string()
}
fn default_converter_url() -> String {
    "http://localhost:5001".to_string()
}
fn default_converter_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (DOCCHAT__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("DOCCHAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the broker cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "broker.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.broker.orphan_ttl_secs <= self.broker.timeout_secs {
            return Err(ConfigError::Message(format!(
                "broker.orphan_ttl_secs ({}) must exceed broker.timeout_secs ({})",
                self.broker.orphan_ttl_secs, self.broker.timeout_secs
            )));
        }
        Ok(())
    }
}
