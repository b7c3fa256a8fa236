//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Federation configuration.
    #[serde(default)]
    pub federation: FederationConfig,
    /// Queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
    /// Local usernames to create at startup (keypairs are generated).
    #[serde(default)]
    pub local_users: Vec<String>,
}

/// Federation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Whether federation is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Timeout for remote document fetches, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Timeout for a single delivery POST, in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    /// Retry bound for transient key-fetch failures.
    #[serde(default = "default_fetch_retries")]
    pub fetch_max_retries: u32,
}

/// Queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of validation workers.
    #[serde(default = "default_validate_workers")]
    pub validate_workers: usize,
    /// Number of background key-fetch workers.
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
    /// Number of delivery workers.
    #[serde(default = "default_deliver_workers")]
    pub deliver_workers: usize,
    /// Bounded channel capacity per queue.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_timeout_secs: default_fetch_timeout(),
            delivery_timeout_secs: default_delivery_timeout(),
            fetch_max_retries: default_fetch_retries(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            validate_workers: default_validate_workers(),
            fetch_workers: default_fetch_workers(),
            deliver_workers: default_deliver_workers(),
            capacity: default_capacity(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_true() -> bool {
    true
}

const fn default_fetch_timeout() -> u64 {
    10
}

const fn default_delivery_timeout() -> u64 {
    30
}

const fn default_fetch_retries() -> u32 {
    3
}

const fn default_validate_workers() -> usize {
    4
}

const fn default_fetch_workers() -> usize {
    4
}

const fn default_deliver_workers() -> usize {
    8
}

const fn default_capacity() -> usize {
    1024
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `POSTBOX_ENV`)
    /// 3. Environment variables with `POSTBOX_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("POSTBOX_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("POSTBOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("POSTBOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
