//! Object-safe view of a downloader for combined contexts
//!
//! [`DownloaderService`] has generic methods, so a context cannot hold it as
//! a trait object. Child downloads travel through [`ErasedDownloader`]
//! instead, with their results boxed as [`AnyValue`] and downcast again
//! once the download finished.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, ChildCallback, DownloadCallback};
use crate::downloader::DownloaderService;
use crate::error::{DownloadError, Result};
use crate::handle::DownloadHandle;
use crate::task::{DownloadSession, DownloadTask, Locator};

pub(crate) type AnyValue = Box<dyn Any + Send>;

pub(crate) trait ErasedDownloader: Send + Sync + 'static {
    fn download_any(
        &self,
        task: Arc<dyn DownloadTask<AnyValue>>,
        callback: Option<Arc<dyn DownloadCallback<AnyValue>>>,
        tries: u32,
    ) -> Result<DownloadHandle<AnyValue>>;
}

impl<D: DownloaderService> ErasedDownloader for D {
    fn download_any(
        &self,
        task: Arc<dyn DownloadTask<AnyValue>>,
        callback: Option<Arc<dyn DownloadCallback<AnyValue>>>,
        tries: u32,
    ) -> Result<DownloadHandle<AnyValue>> {
        self.download_with_tries(task, callback, tries)
    }
}

pub(crate) fn downcast<R: 'static>(value: AnyValue) -> Result<R> {
    value
        .downcast::<R>()
        .map(|boxed| *boxed)
        .map_err(|_| DownloadError::session("child download produced an unexpected result type"))
}

/// Task adapter boxing the wrapped task's result
pub(crate) struct AnyTask<R> {
    inner: Arc<dyn DownloadTask<R>>,
}

impl<R> AnyTask<R> {
    pub(crate) fn new(inner: Arc<dyn DownloadTask<R>>) -> Self {
        Self { inner }
    }
}

impl<R: Send + 'static> DownloadTask<AnyValue> for AnyTask<R> {
    fn locator(&self) -> &Locator {
        self.inner.locator()
    }

    fn is_cacheable(&self) -> bool {
        self.inner.is_cacheable()
    }

    fn create_session(&self, expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<AnyValue>>> {
        let inner = self.inner.create_session(expected_len)?;
        Ok(Box::new(AnySession { inner }))
    }
}

struct AnySession<R> {
    inner: Box<dyn DownloadSession<R>>,
}

impl<R: Send + 'static> DownloadSession<AnyValue> for AnySession<R> {
    fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.inner.receive(data)
    }

    fn completed(self: Box<Self>) -> Result<AnyValue> {
        self.inner.completed().map(|value| Box::new(value) as AnyValue)
    }

    fn failed(self: Box<Self>) {
        self.inner.failed();
    }
}

/// Observers of one child download: the callback given at submission plus
/// whatever the enclosing composites returned from `task_start`
pub(crate) struct UnitObserver<R> {
    user: Option<Arc<dyn DownloadCallback<R>>>,
    children: Vec<Arc<dyn ChildCallback>>,
}

impl<R> UnitObserver<R> {
    pub(crate) fn new(user: Option<Arc<dyn DownloadCallback<R>>>, children: Vec<Arc<dyn ChildCallback>>) -> Self {
        Self { user, children }
    }
}

impl<R: 'static> Callback<R> for UnitObserver<R> {
    fn done(&self, result: &R) {
        if let Some(user) = &self.user {
            user.done(result);
        }
        for child in &self.children {
            child.done(result);
        }
    }

    fn failed(&self, error: &DownloadError) {
        if let Some(user) = &self.user {
            user.failed(error);
        }
        for child in &self.children {
            child.failed(error);
        }
    }

    fn cancelled(&self) {
        if let Some(user) = &self.user {
            user.cancelled();
        }
        for child in &self.children {
            child.cancelled();
        }
    }
}

/// Forwards retry notifications of the erased download to a [`UnitObserver`].
/// Terminal notifications are fired by the unit itself after downcasting.
pub(crate) struct RetryRelay<R>(pub(crate) Arc<UnitObserver<R>>);

impl<R: 'static> Callback<AnyValue> for RetryRelay<R> {}

impl<R: 'static> DownloadCallback<AnyValue> for RetryRelay<R> {
    fn retry(&self, error: &DownloadError, attempt: u32, max_attempts: u32) {
        if let Some(user) = &self.0.user {
            user.retry(error, attempt, max_attempts);
        }
        for child in &self.0.children {
            child.retry(error, attempt, max_attempts);
        }
    }
}
