//! Assemble the default downloader stack from configuration
//!
//! HTTP transport, retrying downloader, cache decorator and combined
//! downloader, sharing one [`Metrics`] instance.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::cache::{CacheError, CacheStore, CachedDownloader, FjallCacheStore, MemoryCacheStore, NullCacheStore};
use crate::combine::CombinedDownloader;
use crate::config::{CacheBackend, CacheConfig, Config};
use crate::downloader::{Downloader, HttpTransport};
use crate::error::DownloadError;
use crate::observability::Metrics;

pub type Stack = CombinedDownloader<CachedDownloader<Downloader<HttpTransport>>>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Downloader setup failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Cache setup failed: {0}")]
    Cache(#[from] CacheError),
}

/// Open the configured cache backend
pub fn open_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    let store: Arc<dyn CacheStore> = match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
        CacheBackend::Disk => Arc::new(FjallCacheStore::open(&config.path, &config.partition)?),
        CacheBackend::None => Arc::new(NullCacheStore),
    };
    Ok(store)
}

/// Build the full stack. Must be called inside a tokio runtime.
pub fn build(config: &Config, metrics: Arc<Metrics>) -> Result<Stack, BuildError> {
    let transport = HttpTransport::new(&config.http.to_http_config())?;
    let downloader = Downloader::with_metrics(transport, &config.downloader, Arc::clone(&metrics))?;

    let store = open_store(&config.cache)?;
    let cached = CachedDownloader::new(downloader, store, config.cache.write_budget).with_metrics(metrics);

    let combined = CombinedDownloader::new(cached, &config.combined)?;

    info!(
        backend = ?config.cache.backend,
        max_attempts = config.downloader.max_attempts,
        max_concurrent_downloads = config.downloader.max_concurrent_downloads,
        worker_pool_size = config.combined.worker_pool_size,
        "Downloader stack ready"
    );
    Ok(combined)
}
