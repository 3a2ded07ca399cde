//! Downloader service: executes tasks with bounded retries
//!
//! [`Downloader`] opens a connection through its [`Transport`], streams the
//! body into a fresh session per attempt and reports every step to the
//! task's [`DownloadCallback`]. Attempts for one task are strictly
//! sequential; different tasks run concurrently up to
//! `max_concurrent_downloads`.

mod http;
mod retry;
mod transport;

pub use http::{HttpConfig, HttpTransport};
pub use retry::retry_delay;
pub use transport::{ByteStream, Connection, Transport};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::callback::DownloadCallback;
use crate::config::DownloaderConfig;
use crate::error::{DownloadError, Result};
use crate::handle::{Completer, DownloadHandle};
use crate::observability::Metrics;
use crate::task::DownloadTask;

/// Attempts per download when nothing else is configured
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A service that runs download tasks
///
/// Implemented by [`Downloader`] and by decorators wrapping one, such as
/// [`crate::cache::CachedDownloader`].
pub trait DownloaderService: Send + Sync + 'static {
    /// Start downloading with the service's default attempt limit.
    ///
    /// Returns immediately; the transfer runs in the background.
    fn download<T: Send + 'static>(
        &self,
        task: Arc<dyn DownloadTask<T>>,
        callback: Option<Arc<dyn DownloadCallback<T>>>,
    ) -> Result<DownloadHandle<T>> {
        self.download_with_tries(task, callback, self.default_tries())
    }

    /// Start downloading with at most `tries` attempts.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidArgument`] if `tries` is 0
    /// - [`DownloadError::Rejected`] after [`shutdown`](Self::shutdown)
    fn download_with_tries<T: Send + 'static>(
        &self,
        task: Arc<dyn DownloadTask<T>>,
        callback: Option<Arc<dyn DownloadCallback<T>>>,
        tries: u32,
    ) -> Result<DownloadHandle<T>>;

    fn default_tries(&self) -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    /// Stop accepting downloads. In-flight downloads keep running.
    /// Calling it again is a no-op.
    fn shutdown(&self) -> Result<()>;

    fn is_shutdown(&self) -> bool;
}

pub(crate) fn check_tries(tries: u32) -> Result<()> {
    if tries < 1 {
        return Err(DownloadError::InvalidArgument(format!(
            "max attempts must be at least 1, got {}",
            tries
        )));
    }
    Ok(())
}

struct Shared<Tr> {
    transport: Tr,
    limiter: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
    shutdown: AtomicBool,
    max_attempts: u32,
    retry_backoff: Duration,
    max_retry_backoff: Duration,
    metrics: Arc<Metrics>,
}

/// Retrying downloader over a [`Transport`]
pub struct Downloader<Tr> {
    shared: Arc<Shared<Tr>>,
}

impl<Tr> Clone for Downloader<Tr> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Tr: Transport> Downloader<Tr> {
    /// Build a downloader bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or with a zero attempt/concurrency limit.
    pub fn new(transport: Tr, config: &DownloaderConfig) -> Result<Self> {
        Self::with_metrics(transport, config, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(transport: Tr, config: &DownloaderConfig, metrics: Arc<Metrics>) -> Result<Self> {
        check_tries(config.max_attempts)?;
        if config.max_concurrent_downloads == 0 {
            return Err(DownloadError::InvalidArgument(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }

        let runtime = Handle::try_current()
            .map_err(|e| DownloadError::InvalidArgument(format!("no tokio runtime: {}", e)))?;

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                limiter: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
                tracker: TaskTracker::new(),
                runtime,
                shutdown: AtomicBool::new(false),
                max_attempts: config.max_attempts,
                retry_backoff: config.retry_backoff(),
                max_retry_backoff: config.max_retry_backoff(),
                metrics,
            }),
        })
    }

    pub fn transport(&self) -> &Tr {
        &self.shared.transport
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    /// Wait until every download started before shutdown has finished.
    pub async fn drained(&self) {
        self.shared.tracker.wait().await;
    }
}

impl<Tr: Transport> DownloaderService for Downloader<Tr> {
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

        let (handle, completer) = DownloadHandle::pending(CancellationToken::new());
        self.shared.metrics.download_started();
        debug!(locator = %task.locator(), max_attempts = tries, "Download submitted");

        let shared = Arc::clone(&self.shared);
        self.shared.tracker.spawn_on(
            async move { shared.run(task, callback, tries, completer).await },
            &self.shared.runtime,
        );

        Ok(handle)
    }

    fn default_tries(&self) -> u32 {
        self.shared.max_attempts
    }

    fn shutdown(&self) -> Result<()> {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            self.shared.tracker.close();
            info!(in_flight = self.shared.tracker.len(), "Downloader shut down");
        }
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl<Tr: Transport> Shared<Tr> {
    async fn run<T: Send + 'static>(
        &self,
        task: Arc<dyn DownloadTask<T>>,
        callback: Option<Arc<dyn DownloadCallback<T>>>,
        tries: u32,
        completer: Completer<T>,
    ) {
        let token = completer.token().clone();
        let outcome = self
            .execute(task.as_ref(), callback.as_deref(), tries, &token)
            .await;

        match &outcome {
            Ok(_) => debug!(locator = %task.locator(), "Download completed"),
            Err(DownloadError::Cancelled) => debug!(locator = %task.locator(), "Download cancelled"),
            Err(e) => {
                self.metrics.download_failed();
                warn!(locator = %task.locator(), error = %e, "Download failed");
            }
        }

        completer.resolve(outcome, callback.as_deref());
    }

    async fn execute<T>(
        &self,
        task: &dyn DownloadTask<T>,
        callback: Option<&dyn DownloadCallback<T>>,
        tries: u32,
        token: &CancellationToken,
    ) -> Result<T> {
        let mut permit = self.acquire(token).await?;

        let locator = task.locator();
        let mut attempt = 1;
        loop {
            debug!(locator = %locator, attempt, max_attempts = tries, "Starting attempt");

            let error = match AssertUnwindSafe(self.attempt(task, token)).catch_unwind().await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(locator = %locator, attempt, "Download succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => DownloadError::session("session panicked"),
            };

            if error.is_cancelled() || !error.is_retryable() || attempt >= tries {
                return Err(error);
            }

            warn!(locator = %locator, attempt, max_attempts = tries, error = %error, "Attempt failed, retrying");
            self.metrics.retry();
            if let Some(callback) = callback {
                callback.retry(&error, attempt, tries);
            }

            let delay = retry_delay(attempt - 1, self.retry_backoff, self.max_retry_backoff);
            if !delay.is_zero() {
                // Backoff does not occupy a download slot.
                drop(permit);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(DownloadError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                permit = self.acquire(token).await?;
            }
            attempt += 1;
        }
    }

    async fn acquire(&self, token: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DownloadError::Cancelled),
            permit = Arc::clone(&self.limiter).acquire_owned() => {
                permit.map_err(|_| DownloadError::Rejected)
            }
        }
    }

    /// One connection, one session
    async fn attempt<T>(&self, task: &dyn DownloadTask<T>, token: &CancellationToken) -> Result<T> {
        let connection = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            connection = self.transport.open(task.locator()) => connection?,
        };

        let mut session = task.create_session(connection.content_length)?;
        let mut body = connection.body;
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    session.failed();
                    return Err(DownloadError::Cancelled);
                }
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    received += chunk.len() as u64;
                    if let Err(e) = session.receive(&chunk) {
                        session.failed();
                        return Err(e);
                    }
                }
                Some(Err(e)) => {
                    session.failed();
                    return Err(e);
                }
                None => break,
            }
        }

        debug!(locator = %task.locator(), bytes = received, "Body received");
        session.completed()
    }
}
