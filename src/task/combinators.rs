use std::marker::PhantomData;
use std::sync::Arc;

use super::{DownloadSession, DownloadTask, Locator};
use crate::error::Result;

/// Combinators available on every task
pub trait TaskExt<T>: DownloadTask<T> + Sized {
    /// Convert the session's result once the body has been fully received.
    /// An error from `f` fails the attempt like any other session error.
    fn map<U, F>(self, f: F) -> MappedTask<Self, T, F>
    where
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        MappedTask {
            inner: self,
            f: Arc::new(f),
            _marker: PhantomData,
        }
    }

    /// Mark the task as eligible for the download cache
    fn cacheable(self) -> CacheableTask<Self> {
        CacheableTask { inner: self }
    }
}

impl<T, D: DownloadTask<T>> TaskExt<T> for D {}

pub struct MappedTask<D, T, F> {
    inner: D,
    f: Arc<F>,
    _marker: PhantomData<fn() -> T>,
}

impl<D, T, U, F> DownloadTask<U> for MappedTask<D, T, F>
where
    D: DownloadTask<T>,
    T: 'static,
    U: 'static,
    F: Fn(T) -> Result<U> + Send + Sync + 'static,
{
    fn locator(&self) -> &Locator {
        self.inner.locator()
    }

    fn is_cacheable(&self) -> bool {
        self.inner.is_cacheable()
    }

    fn create_session(&self, expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<U>>> {
        let inner = self.inner.create_session(expected_len)?;
        Ok(Box::new(MappedSession {
            inner,
            f: Arc::clone(&self.f),
        }))
    }
}

struct MappedSession<T, F> {
    inner: Box<dyn DownloadSession<T>>,
    f: Arc<F>,
}

impl<T, U, F> DownloadSession<U> for MappedSession<T, F>
where
    F: Fn(T) -> Result<U> + Send + Sync,
{
    fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.inner.receive(data)
    }

    fn completed(self: Box<Self>) -> Result<U> {
        let value = self.inner.completed()?;
        (self.f)(value)
    }

    fn failed(self: Box<Self>) {
        self.inner.failed();
    }
}

pub struct CacheableTask<D> {
    inner: D,
}

impl<T, D: DownloadTask<T>> DownloadTask<T> for CacheableTask<D> {
    fn locator(&self) -> &Locator {
        self.inner.locator()
    }

    fn is_cacheable(&self) -> bool {
        true
    }

    fn create_session(&self, expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<T>>> {
        self.inner.create_session(expected_len)
    }
}
