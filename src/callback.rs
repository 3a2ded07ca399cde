//! Observer traits for download and composite lifecycles
//!
//! A handle delivers exactly one terminal notification (`done`, `failed` or
//! `cancelled`) to its callback. Download callbacks may additionally see any
//! number of `retry` notifications before that. Every method has a no-op
//! default, so observers implement only what they care about.

use std::any::Any;
use std::sync::Arc;

use crate::error::DownloadError;
use crate::task::Locator;

pub trait Callback<T>: Send + Sync {
    fn done(&self, _result: &T) {}

    fn failed(&self, _error: &DownloadError) {}

    fn cancelled(&self) {}
}

pub trait DownloadCallback<T>: Callback<T> {
    /// `attempt` is the 1-based attempt that just failed.
    fn retry(&self, _error: &DownloadError, _attempt: u32, _max_attempts: u32) {}
}

pub trait CombinedCallback<T>: Callback<T> {
    /// Fired synchronously when the composite body submits a download, before
    /// that download can terminate. The returned observer is driven for the
    /// child in addition to the callback passed at submission.
    fn task_start(&self, _locator: &Locator) -> Option<Arc<dyn ChildCallback>> {
        None
    }
}

/// Per-child observer returned by [`CombinedCallback::task_start`]
///
/// Children of one composite produce different result types, so the
/// result arrives type-erased; downcast it with [`Any::downcast_ref`].
pub trait ChildCallback: Send + Sync {
    fn done(&self, _result: &dyn Any) {}

    fn failed(&self, _error: &DownloadError) {}

    fn cancelled(&self) {}

    fn retry(&self, _error: &DownloadError, _attempt: u32, _max_attempts: u32) {}
}

/// Callback that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl<T> Callback<T> for NoopCallback {}

impl<T> DownloadCallback<T> for NoopCallback {}

impl<T> CombinedCallback<T> for NoopCallback {}

impl ChildCallback for NoopCallback {}
