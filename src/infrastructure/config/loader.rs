use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding the project configuration files.
pub const CONFIG_DIR: &str = ".trialsync";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid server address: {0}")]
    InvalidServerAddress(String),

    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(u32),

    #[error("Invalid {0}: must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("Invalid max_concurrent_reconciles: {0}. Must be between 1 and 64")]
    InvalidConcurrency(usize),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .trialsync/config.yaml
    /// 3. .trialsync/local.yaml (optional developer overrides)
    /// 4. Environment variables (TRIALSYNC_* prefix, `__` between sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same as [`ConfigLoader::load`] with the project files read from `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("TRIALSYNC_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring the environment
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(&path))
            .merge(Env::prefixed("TRIALSYNC_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let address = &config.server.address;
        match reqwest::Url::parse(address) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(ConfigError::InvalidServerAddress(address.clone())),
        }

        if config.server.rate_limit_rps == 0 {
            return Err(ConfigError::InvalidRateLimit(config.server.rate_limit_rps));
        }
        if config.server.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("request_timeout_secs"));
        }
        if config.metrics.http_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("http_timeout_secs"));
        }

        let controller = &config.controller;
        if controller.max_concurrent_reconciles == 0 || controller.max_concurrent_reconciles > 64 {
            return Err(ConfigError::InvalidConcurrency(controller.max_concurrent_reconciles));
        }
        if controller.initial_backoff_ms >= controller.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                controller.initial_backoff_ms,
                controller.max_backoff_ms,
            ));
        }
        if controller.resync_interval_secs == 0 {
            return Err(ConfigError::ZeroTimeout("resync_interval_secs"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !["json", "pretty"].contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        if !["daily", "hourly", "never"].contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}
