use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub combined: CombinedConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Retry and concurrency settings of the downloader service
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloaderConfig {
    /// Attempts per download when the caller does not pass its own limit
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    /// Base delay before the second attempt; doubles for each further one
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,
}

impl DownloaderConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_concurrent_downloads() -> usize {
    16
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_retry_backoff_ms() -> u64 {
    30_000
}

/// HTTP transport settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    concat!("fetchcore/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_redirects() -> usize {
    10
}

/// Where cached download bodies live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Disk,
    None,
}

/// Download cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Keyspace directory for the disk backend
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_cache_partition")]
    pub partition: String,
    /// Largest body buffered for caching; bigger downloads are not cached
    #[serde(default = "default_write_budget")]
    pub write_budget: ByteSize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: default_cache_path(),
            partition: default_cache_partition(),
            write_budget: default_write_budget(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_cache_partition() -> String {
    "downloads".to_string()
}

fn default_write_budget() -> ByteSize {
    ByteSize(64 * 1024 * 1024) // 64 MB
}

/// Combined downloader configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CombinedConfig {
    /// Callables running at once across all composite tasks
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl Default for CombinedConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    8
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
