//! Observability (download counters, tracing setup)

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

/// Counters shared by the downloader, cache and combined layers
#[derive(Debug, Default)]
pub struct Metrics {
    downloads_started: AtomicU64,
    downloads_failed: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "downloads_started", "Metric incremented");
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "downloads_failed", "Metric incremented");
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "retries", "Metric incremented");
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "cache_hits", "Metric incremented");
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "cache_misses", "Metric incremented");
    }

    pub fn cache_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "cache_evictions", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub downloads_started: u64,
    pub downloads_failed: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Calling this twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.download_started();
        metrics.download_started();
        metrics.retry();
        metrics.cache_hit();
        metrics.cache_miss();
        metrics.cache_eviction();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.downloads_started, 2);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.downloads_failed, 0);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_evictions, 1);
    }
}
