//! Task and session protocol
//!
//! A [`DownloadTask`] is an immutable descriptor: a [`Locator`] identifying
//! the resource, a cacheable flag, and a factory for [`DownloadSession`]s.
//! Every attempt (first try, retry, cache replay) gets a fresh session, which
//! consumes byte chunks and is terminated by exactly one of
//! [`completed`](DownloadSession::completed) or
//! [`failed`](DownloadSession::failed).
//!
//! ## Built-in tasks
//!
//! - [`MemoryTask`] - collects the body into [`bytes::Bytes`]
//! - [`FileTask`] - streams the body into a file, placed atomically
//! - [`TaskExt::map`] / [`TaskExt::cacheable`] - combinators over any task

mod combinators;
mod file;
mod memory;

pub use combinators::{CacheableTask, MappedTask, TaskExt};
pub use file::FileTask;
pub use memory::MemoryTask;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Opaque, comparable resource identity (usually a URL)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locator(Arc<str>);

impl Locator {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Locator {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<[u8]> for Locator {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Per-attempt consumer of byte chunks
///
/// `receive` may be called any number of times with chunks of any size,
/// including empty ones. The terminal methods take the session by value, so
/// a session can never be reused. When `completed` fails, the session cleans
/// up after itself before returning the error.
pub trait DownloadSession<T>: Send {
    fn receive(&mut self, data: &[u8]) -> Result<()>;

    fn completed(self: Box<Self>) -> Result<T>;

    fn failed(self: Box<Self>);
}

/// Immutable description of one fetchable resource
pub trait DownloadTask<T>: Send + Sync {
    fn locator(&self) -> &Locator;

    /// Whether the cache decorator may store and replay this task's bytes
    fn is_cacheable(&self) -> bool {
        false
    }

    /// Create a fresh session; `expected_len` is the announced body length
    /// when the transport (or the cache) knows it.
    fn create_session(&self, expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<T>>>;
}

impl<T, D> DownloadTask<T> for Arc<D>
where
    D: DownloadTask<T> + ?Sized,
{
    fn locator(&self) -> &Locator {
        (**self).locator()
    }

    fn is_cacheable(&self) -> bool {
        (**self).is_cacheable()
    }

    fn create_session(&self, expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<T>>> {
        (**self).create_session(expected_len)
    }
}
