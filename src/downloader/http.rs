//! HTTP transport backed by reqwest

use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use futures::StreamExt;
use reqwest::Client;
use tracing::debug;

use super::transport::{Connection, Transport};
use crate::error::{DownloadError, Result};
use crate::task::Locator;

/// HTTP client configuration
#[derive(Debug, Clone, Builder)]
pub struct HttpConfig {
    #[builder(default = Duration::from_secs(10))]
    pub connect_timeout: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub request_timeout: Duration,
    #[builder(into, default = concat!("fetchcore/", env!("CARGO_PKG_VERSION")).to_string())]
    pub user_agent: String,
    #[builder(default = 10)]
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Streams resources over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| DownloadError::InvalidArgument(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        DownloadError::Timeout
    } else if e.is_redirect() {
        DownloadError::Transport("too many redirects".to_string())
    } else if e.is_builder() {
        DownloadError::InvalidArgument(e.to_string())
    } else {
        DownloadError::Transport(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, locator: &Locator) -> Result<Connection> {
        debug!(url = %locator, "Opening HTTP connection");

        let response = self
            .client
            .get(locator.as_str())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let content_length = response.content_length();
        debug!(url = %locator, ?content_length, "Response headers received");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error))
            .boxed();

        Ok(Connection::new(content_length, body))
    }
}
