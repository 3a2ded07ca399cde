use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::task::Locator;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Cache store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Key-value store holding raw download bodies keyed by locator
///
/// Implementations must be safe for concurrent use: a `put` for one key is
/// never observed half-written by a concurrent `get` for the same key.
pub trait CacheStore: Send + Sync + 'static {
    fn get(&self, key: &Locator) -> Result<Option<Bytes>>;

    /// Store `value`, replacing any previous entry for `key`
    fn put(&self, key: &Locator, value: Bytes) -> Result<()>;

    fn remove(&self, key: &Locator) -> Result<()>;

    /// Release the store. Later calls fail with [`CacheError::Closed`].
    fn close(&self) -> Result<()>;
}

/// In-process cache store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<Locator, Bytes>>,
    closed: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &Locator) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &Locator, value: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.entries.write().insert(key.clone(), value);
        Ok(())
    }

    fn remove(&self, key: &Locator) -> Result<()> {
        self.ensure_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut entries = self.entries.write();
            debug!(entries = entries.len(), "Memory cache released");
            entries.clear();
        }
        Ok(())
    }
}

/// Store that never holds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCacheStore;

impl CacheStore for NullCacheStore {
    fn get(&self, _key: &Locator) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn put(&self, _key: &Locator, _value: Bytes) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &Locator) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_put_get_remove() {
        let store = MemoryCacheStore::new();
        let key = Locator::new("https://example.com/a");

        assert!(store.get(&key).unwrap().is_none());
        store.put(&key, Bytes::from_static(b"one")).unwrap();
        store.put(&key, Bytes::from_static(b"two")).unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap(), Bytes::from_static(b"two"));
        assert_eq!(store.len(), 1);

        store.remove(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_close_rejects_access() {
        let store = MemoryCacheStore::new();
        let key = Locator::new("k");
        store.put(&key, Bytes::from_static(b"v")).unwrap();

        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get(&key), Err(CacheError::Closed)));
        assert!(matches!(store.put(&key, Bytes::new()), Err(CacheError::Closed)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_concurrent_puts_never_tear() {
        let store = Arc::new(MemoryCacheStore::new());
        let key = Locator::new("shared");
        let a = Bytes::from(vec![b'a'; 4096]);
        let b = Bytes::from(vec![b'b'; 4096]);

        let writers: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|value| {
                let store = Arc::clone(&store);
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.put(&key, value.clone()).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            if let Some(value) = store.get(&key).unwrap() {
                assert!(value == a || value == b);
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[test]
    fn test_null_store_always_misses() {
        let store = NullCacheStore;
        let key = Locator::new("k");
        store.put(&key, Bytes::from_static(b"v")).unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }
}
