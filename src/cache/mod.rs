//! Caching decorator for downloader services
//!
//! [`CachedDownloader`] wraps any [`DownloaderService`]. Cacheable tasks are
//! first looked up in a [`CacheStore`] by locator:
//!
//! - **hit**: the stored bytes are replayed through a fresh session without
//!   touching the network, and an already-resolved handle is returned
//! - **miss**: the download goes upstream through a tee that captures the
//!   body and stores it once the session completes
//! - **unusable entry**: if replay fails (corrupt bytes, a session that
//!   rejects them, a panic), the entry is evicted and the download falls
//!   back to one upstream fetch, which repopulates the cache
//!
//! Cache faults never surface to the caller.

mod caching;
mod disk;
mod store;

pub use disk::FjallCacheStore;
pub use store::{CacheError, CacheStore, MemoryCacheStore, NullCacheStore};

use bytes::Bytes;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::callback::DownloadCallback;
use crate::downloader::{DownloaderService, check_tries};
use crate::error::{DownloadError, Result};
use crate::handle::DownloadHandle;
use crate::humanize::ByteSize;
use crate::observability::Metrics;
use crate::task::{DownloadTask, Locator};
use caching::CachingTask;

pub struct CachedDownloader<D, S: ?Sized = dyn CacheStore> {
    upstream: D,
    store: Arc<S>,
    write_budget: usize,
    metrics: Arc<Metrics>,
}

impl<D: DownloaderService, S: CacheStore + ?Sized> CachedDownloader<D, S> {
    /// Bodies larger than `write_budget` are downloaded but not cached.
    pub fn new(upstream: D, store: Arc<S>, write_budget: ByteSize) -> Self {
        Self {
            upstream,
            store,
            write_budget: write_budget.as_usize(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn upstream(&self) -> &D {
        &self.upstream
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Rebuild a result from cached bytes
    fn replay<T>(&self, task: &dyn DownloadTask<T>, cached: &Bytes) -> Result<T> {
        let replayed = catch_unwind(AssertUnwindSafe(|| {
            let mut session = task.create_session(Some(cached.len() as u64))?;
            if let Err(e) = session.receive(cached) {
                session.failed();
                return Err(e);
            }
            session.completed()
        }));

        replayed.unwrap_or_else(|_| Err(DownloadError::session("session panicked during cache replay")))
    }

    fn evict(&self, locator: &Locator, cause: &DownloadError) {
        warn!(locator = %locator, error = %cause, "Cached entry unusable, evicting");
        self.metrics.cache_eviction();
        if let Err(e) = self.store.remove(locator) {
            warn!(locator = %locator, error = %e, "Failed to evict cache entry");
        }
    }
}

impl<D: DownloaderService, S: CacheStore + ?Sized> DownloaderService for CachedDownloader<D, S> {
    fn download_with_tries<T: Send + 'static>(
        &self,
        task: Arc<dyn DownloadTask<T>>,
        callback: Option<Arc<dyn DownloadCallback<T>>>,
        tries: u32,
    ) -> Result<DownloadHandle<T>> {
        check_tries(tries)?;
        if self.is_shutdown() {
            return Err(DownloadError::Rejected);
        }

        if !task.is_cacheable() {
            return self.upstream.download_with_tries(task, callback, tries);
        }

        let locator = task.locator().clone();
        match self.store.get(&locator) {
            Ok(Some(cached)) => match self.replay(task.as_ref(), &cached) {
                Ok(value) => {
                    self.metrics.cache_hit();
                    debug!(locator = %locator, bytes = cached.len(), "Served from cache");
                    if let Some(callback) = &callback {
                        callback.done(&value);
                    }
                    return Ok(DownloadHandle::ready(value));
                }
                Err(e) => self.evict(&locator, &e),
            },
            Ok(None) => {
                self.metrics.cache_miss();
                debug!(locator = %locator, "Cache miss");
            }
            Err(e) => {
                self.metrics.cache_miss();
                warn!(locator = %locator, error = %e, "Cache lookup failed, fetching upstream");
            }
        }

        let caching: Arc<dyn DownloadTask<T>> =
            Arc::new(CachingTask::new(task, Arc::clone(&self.store), self.write_budget));
        self.upstream.download_with_tries(caching, callback, tries)
    }

    fn default_tries(&self) -> u32 {
        self.upstream.default_tries()
    }

    /// Shut the upstream down, then close the store even if that failed
    fn shutdown(&self) -> Result<()> {
        let upstream = self.upstream.shutdown();

        let store = self.store.close().map_err(|e| {
            warn!(error = %e, "Failed to close cache store");
            DownloadError::Cache(e.to_string())
        });

        upstream.and(store)
    }

    fn is_shutdown(&self) -> bool {
        self.upstream.is_shutdown()
    }
}
