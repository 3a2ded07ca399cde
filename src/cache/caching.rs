use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, warn};

use super::store::CacheStore;
use crate::error::Result;
use crate::task::{DownloadSession, DownloadTask, Locator};

/// Wraps a cacheable task so that a real fetch also fills the cache
///
/// Sessions created here forward every chunk to the wrapped session and keep
/// a copy in a buffer bounded by `write_budget`. The copy is written to the
/// store only after the wrapped session completed successfully.
pub(crate) struct CachingTask<T, S: ?Sized> {
    inner: Arc<dyn DownloadTask<T>>,
    store: Arc<S>,
    write_budget: usize,
}

impl<T, S: CacheStore + ?Sized> CachingTask<T, S> {
    pub(crate) fn new(inner: Arc<dyn DownloadTask<T>>, store: Arc<S>, write_budget: usize) -> Self {
        Self {
            inner,
            store,
            write_budget,
        }
    }
}

impl<T: 'static, S: CacheStore + ?Sized> DownloadTask<T> for CachingTask<T, S> {
    fn locator(&self) -> &Locator {
        self.inner.locator()
    }

    fn is_cacheable(&self) -> bool {
        self.inner.is_cacheable()
    }

    fn create_session(&self, expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<T>>> {
        let inner = self.inner.create_session(expected_len)?;

        let buffer = match expected_len {
            Some(len) if len > self.write_budget as u64 => {
                debug!(
                    locator = %self.locator(),
                    bytes = len,
                    budget = self.write_budget,
                    "Body exceeds cache write budget, not caching"
                );
                None
            }
            Some(len) => Some(BytesMut::with_capacity(len as usize)),
            None => Some(BytesMut::new()),
        };

        Ok(Box::new(CachingSession {
            inner,
            buffer,
            write_budget: self.write_budget,
            store: Arc::clone(&self.store),
            locator: self.locator().clone(),
        }))
    }
}

struct CachingSession<T, S: ?Sized> {
    inner: Box<dyn DownloadSession<T>>,
    /// `None` once caching was given up for this attempt
    buffer: Option<BytesMut>,
    write_budget: usize,
    store: Arc<S>,
    locator: Locator,
}

impl<T, S: CacheStore + ?Sized> DownloadSession<T> for CachingSession<T, S> {
    fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.inner.receive(data)?;

        let overflow = match &self.buffer {
            Some(buffer) => buffer.len() + data.len() > self.write_budget,
            None => return Ok(()),
        };

        if overflow {
            debug!(
                locator = %self.locator,
                budget = self.write_budget,
                "Cache write budget exceeded, not caching"
            );
            self.buffer = None;
        } else if let Some(buffer) = &mut self.buffer {
            buffer.extend_from_slice(data);
        }
        Ok(())
    }

    fn completed(self: Box<Self>) -> Result<T> {
        let CachingSession {
            inner,
            buffer,
            store,
            locator,
            ..
        } = *self;

        let value = inner.completed()?;

        if let Some(buffer) = buffer {
            let len = buffer.len();
            match store.put(&locator, buffer.freeze()) {
                Ok(()) => debug!(locator = %locator, bytes = len, "Cached download body"),
                Err(e) => warn!(locator = %locator, error = %e, "Failed to cache download body"),
            }
        }

        Ok(value)
    }

    fn failed(self: Box<Self>) {
        self.inner.failed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::DownloadError;
    use crate::task::{MemoryTask, TaskExt};
    use bytes::Bytes;

    fn caching(budget: usize) -> (CachingTask<Bytes, MemoryCacheStore>, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new());
        let task: Arc<dyn DownloadTask<Bytes>> = Arc::new(MemoryTask::new("mem://a").cacheable());
        (CachingTask::new(task, Arc::clone(&store), budget), store)
    }

    #[test]
    fn test_commits_on_completion() {
        let (task, store) = caching(1024);
        let mut session = task.create_session(None).unwrap();
        session.receive(b"12").unwrap();
        session.receive(b"34").unwrap();
        assert!(store.is_empty());

        assert_eq!(session.completed().unwrap(), Bytes::from_static(b"1234"));
        assert_eq!(
            store.get(&Locator::new("mem://a")).unwrap().unwrap(),
            Bytes::from_static(b"1234")
        );
    }

    #[test]
    fn test_failed_session_writes_nothing() {
        let (task, store) = caching(1024);
        let mut session = task.create_session(Some(4)).unwrap();
        session.receive(b"12").unwrap();
        session.failed();
        assert!(store.is_empty());
    }

    #[test]
    fn test_budget_overflow_skips_cache_only() {
        let (task, store) = caching(3);
        let mut session = task.create_session(None).unwrap();
        session.receive(b"12").unwrap();
        session.receive(b"34").unwrap();

        assert_eq!(session.completed().unwrap(), Bytes::from_static(b"1234"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_announced_length_over_budget_skips_cache() {
        let (task, store) = caching(3);
        let mut session = task.create_session(Some(4)).unwrap();
        session.receive(b"1234").unwrap();
        session.completed().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_completion_error_writes_nothing() {
        let store = Arc::new(MemoryCacheStore::new());
        let inner: Arc<dyn DownloadTask<u32>> = Arc::new(
            MemoryTask::new("mem://n")
                .map(|_| Err::<u32, _>(DownloadError::session("unparseable")))
                .cacheable(),
        );
        let task = CachingTask::new(inner, Arc::clone(&store), 1024);

        let mut session = task.create_session(None).unwrap();
        session.receive(b"zz").unwrap();
        assert!(session.completed().is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_failure_does_not_fail_download() {
        let (task, store) = caching(1024);
        store.close().unwrap();

        let mut session = task.create_session(None).unwrap();
        session.receive(b"ok").unwrap();
        assert_eq!(session.completed().unwrap(), Bytes::from_static(b"ok"));
    }
}
