//! Composite downloads
//!
//! A [`CombinedTask`] body receives a [`CombinedContext`] and spawns child
//! units through it: async work, downloads and nested composite tasks. The
//! [`CombinedDownloader`] runs such bodies and resolves each composite to
//! the body's value once the body and its fatal units have finished.
//!
//! ## Scheduling
//!
//! Submitted async work runs on a worker pool bounded by
//! `combined.worker_pool_size`. Child downloads are bounded by the wrapped
//! downloader. Composite bodies (including nested ones) never hold a pool
//! permit, so bodies waiting in [`CombinedContext::await_all_tasks`] cannot
//! starve the pool however deep they nest.

mod context;
mod erased;

pub use context::CombinedContext;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::callback::{CombinedCallback, DownloadCallback};
use crate::config::CombinedConfig;
use crate::downloader::{DownloaderService, check_tries};
use crate::error::{DownloadError, Result};
use crate::handle::DownloadHandle;
use crate::task::DownloadTask;
use context::{Environment, drive, start_hook};
use erased::ErasedDownloader;

/// A task whose body coordinates other units of work
///
/// The value returned by `run` becomes the composite's result. Returning an
/// error fails the composite with that error.
#[async_trait]
pub trait CombinedTask<T>: Send + Sync {
    async fn run(&self, ctx: CombinedContext) -> Result<T>;
}

struct Shared<D> {
    downloader: Arc<D>,
    env: Arc<Environment>,
    tracker: TaskTracker,
    runtime: Handle,
    shutdown: AtomicBool,
}

/// Runs composite tasks on top of a downloader service
///
/// Plain downloads are forwarded to the wrapped service, so one
/// `CombinedDownloader` can serve both kinds of work.
pub struct CombinedDownloader<D> {
    shared: Arc<Shared<D>>,
}

impl<D> Clone for CombinedDownloader<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: DownloaderService> CombinedDownloader<D> {
    /// # Errors
    ///
    /// Fails outside a tokio runtime or with a zero worker pool.
    pub fn new(downloader: D, config: &CombinedConfig) -> Result<Self> {
        if config.worker_pool_size == 0 {
            return Err(DownloadError::InvalidArgument(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|e| DownloadError::InvalidArgument(format!("no tokio runtime: {}", e)))?;

        let downloader = Arc::new(downloader);
        let tracker = TaskTracker::new();
        let env = Arc::new(Environment {
            downloader: Arc::clone(&downloader) as Arc<dyn ErasedDownloader>,
            pool: Arc::new(Semaphore::new(config.worker_pool_size)),
            tracker: tracker.clone(),
            runtime: runtime.clone(),
        });

        Ok(Self {
            shared: Arc::new(Shared {
                downloader,
                env,
                tracker,
                runtime,
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    pub fn downloader(&self) -> &D {
        &self.shared.downloader
    }

    /// Start a composite task with the wrapped downloader's attempt limit
    pub fn download_combined<R>(
        &self,
        task: Arc<dyn CombinedTask<R>>,
        callback: Option<Arc<dyn CombinedCallback<R>>>,
    ) -> Result<DownloadHandle<R>>
    where
        R: Send + 'static,
    {
        let tries = self.shared.downloader.default_tries();
        self.download_combined_with_tries(task, callback, tries)
    }

    /// Start a composite task; every child download gets at most `tries`
    /// attempts.
    pub fn download_combined_with_tries<R>(
        &self,
        task: Arc<dyn CombinedTask<R>>,
        callback: Option<Arc<dyn CombinedCallback<R>>>,
        tries: u32,
    ) -> Result<DownloadHandle<R>>
    where
        R: Send + 'static,
    {
        check_tries(tries)?;
        if self.is_shutdown() {
            return Err(DownloadError::Rejected);
        }

        let token = CancellationToken::new();
        let hooks = callback.iter().map(|callback| start_hook(callback)).collect();
        let context = CombinedContext::new(
            Arc::clone(&self.shared.env),
            token.child_token(),
            hooks,
            tries,
        );
        let (handle, completer) = DownloadHandle::pending(token);

        debug!(max_attempts = tries, "Composite task submitted");
        self.shared.tracker.spawn_on(
            async move {
                let outcome = drive(task, context).await;
                match &outcome {
                    Ok(_) => debug!("Composite task completed"),
                    Err(e) => debug!(error = %e, "Composite task ended"),
                }
                completer.resolve(outcome, callback.as_deref());
            },
            &self.shared.runtime,
        );

        Ok(handle)
    }

    /// Wait until all composite work started before shutdown has finished
    pub async fn drained(&self) {
        self.shared.tracker.wait().await;
    }
}

impl<D: DownloaderService> DownloaderService for CombinedDownloader<D> {
    fn download_with_tries<T: Send + 'static>(
        &self,
        task: Arc<dyn DownloadTask<T>>,
        callback: Option<Arc<dyn DownloadCallback<T>>>,
        tries: u32,
    ) -> Result<DownloadHandle<T>> {
        if self.is_shutdown() {
            return Err(DownloadError::Rejected);
        }
        self.shared.downloader.download_with_tries(task, callback, tries)
    }

    fn default_tries(&self) -> u32 {
        self.shared.downloader.default_tries()
    }

    /// Stop accepting composites, then shut the wrapped downloader down
    fn shutdown(&self) -> Result<()> {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            self.shared.tracker.close();
            info!(in_flight = self.shared.tracker.len(), "Combined downloader shut down");
        }
        self.shared.downloader.shutdown()
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}
