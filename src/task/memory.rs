use bytes::{Bytes, BytesMut};

use super::{DownloadSession, DownloadTask, Locator};
use crate::error::Result;

/// Initial buffer capacity when the body length is unknown
const DEFAULT_CAPACITY: usize = 8192;

/// Upper bound for trusting an announced length when pre-sizing
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Downloads a resource into memory
#[derive(Debug, Clone)]
pub struct MemoryTask {
    locator: Locator,
}

impl MemoryTask {
    pub fn new(locator: impl Into<Locator>) -> Self {
        Self {
            locator: locator.into(),
        }
    }
}

impl DownloadTask<Bytes> for MemoryTask {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn create_session(&self, expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<Bytes>>> {
        let capacity = expected_len
            .map(|len| len.min(MAX_PREALLOCATION) as usize)
            .unwrap_or(DEFAULT_CAPACITY);
        Ok(Box::new(MemorySession {
            buffer: BytesMut::with_capacity(capacity),
        }))
    }
}

struct MemorySession {
    buffer: BytesMut,
}

impl DownloadSession<Bytes> for MemorySession {
    fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn completed(self: Box<Self>) -> Result<Bytes> {
        Ok(self.buffer.freeze())
    }

    fn failed(self: Box<Self>) {}
}
