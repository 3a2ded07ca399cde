use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::error::Result;
use crate::task::Locator;

/// Body chunks as delivered by a transport
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// An opened resource: announced length plus the body stream
pub struct Connection {
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl Connection {
    pub fn new(content_length: Option<u64>, body: ByteStream) -> Self {
        Self {
            content_length,
            body,
        }
    }

    /// A connection whose body is already in memory
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            content_length: Some(data.len() as u64),
            body: stream::once(async move { Ok(data) }).boxed(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens a connection for a locator
///
/// Implementations map their failures onto [`crate::DownloadError`];
/// retryable variants make the downloader try again with a fresh session.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, locator: &Locator) -> Result<Connection>;
}
