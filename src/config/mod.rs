//! Configuration management for fetchcore
//!
//! Settings are layered, lowest priority first:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables
//!
//! # Usage
//!
//! ```no_run
//! use fetchcore::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Attempts per download: {}", config.downloader.max_attempts);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `FETCHCORE__<section>__<key>`:
//! - `FETCHCORE__DOWNLOADER__MAX_ATTEMPTS=5`
//! - `FETCHCORE__CACHE__BACKEND=disk`
//! - `FETCHCORE__CACHE__WRITE_BUDGET=16MB`
//!
//! # Configuration File
//!
//! The file is read from `config/fetchcore.toml` unless `FETCHCORE_CONFIG`
//! points elsewhere. A missing file is not an error.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    CacheBackend, CacheConfig, CombinedConfig, Config, DownloaderConfig, HttpSettings,
    TelemetryConfig,
};
pub use validation::ValidationError;

use std::time::Duration;

use crate::downloader::HttpConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path (plus `.env` and environment
    /// overrides)
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_path(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

impl HttpSettings {
    pub fn to_http_config(&self) -> HttpConfig {
        HttpConfig::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .request_timeout(Duration::from_secs(self.request_timeout_secs))
            .user_agent(self.user_agent.clone())
            .max_redirects(self.max_redirects)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("fetchcore.toml");

        let toml_content = r#"
[downloader]
max_attempts = 2
max_concurrent_downloads = 4
retry_backoff_ms = 100
max_retry_backoff_ms = 1000

[http]
connect_timeout_secs = 3
request_timeout_secs = 30

[cache]
backend = "none"

[combined]
worker_pool_size = 16
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.downloader.max_attempts, 2);
        assert_eq!(config.cache.backend, CacheBackend::None);
        assert_eq!(config.combined.worker_pool_size, 16);

        let http = config.http.to_http_config();
        assert_eq!(http.connect_timeout, Duration::from_secs(3));
        assert_eq!(http.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_runs_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("fetchcore.toml");

        fs::write(&config_path, "[downloader]\nmax_attempts = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ZeroAttempts)
        ));
    }
}
