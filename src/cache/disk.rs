use bytes::Bytes;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::store::{CacheError, CacheStore, Result};
use crate::task::Locator;

/// Disk-backed cache store on a Fjall keyspace
///
/// Layout: one partition, locator (UTF-8 bytes) → raw body. A single
/// `insert` is atomic per key, so readers see either the old or the new
/// body.
pub struct FjallCacheStore {
    keyspace: Keyspace,
    entries: PartitionHandle,
    closed: AtomicBool,
}

impl FjallCacheStore {
    /// Open or create a cache at `path`, storing bodies in `partition`
    pub fn open<P: AsRef<Path>>(path: P, partition: &str) -> Result<Self> {
        info!(path = %path.as_ref().display(), partition, "Opening disk cache");

        let keyspace = Config::new(path).open()?;
        let entries = keyspace.open_partition(partition, PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            entries,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// The store only counts as closed once `flush` succeeded; a failed
    /// flush leaves it open so a later `close` tries again.
    fn close_with(&self, flush: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        flush()?;
        self.closed.store(true, Ordering::Release);
        info!("Disk cache closed");
        Ok(())
    }
}

impl CacheStore for FjallCacheStore {
    fn get(&self, key: &Locator) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self
            .entries
            .get(key.as_str().as_bytes())?
            .map(|slice| Bytes::copy_from_slice(&slice)))
    }

    fn put(&self, key: &Locator, value: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.entries.insert(key.as_str().as_bytes(), value.as_ref())?;
        debug!(locator = %key, bytes = value.len(), "Cache entry written");
        Ok(())
    }

    fn remove(&self, key: &Locator) -> Result<()> {
        self.ensure_open()?;
        self.entries.remove(key.as_str().as_bytes())?;
        Ok(())
    }

    /// Flush the journal to disk and refuse further access
    fn close(&self) -> Result<()> {
        self.close_with(|| Ok(self.keyspace.persist(fjall::PersistMode::SyncAll)?))
    }
}
