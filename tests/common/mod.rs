//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use fetchcore::callback::{Callback, ChildCallback, CombinedCallback, DownloadCallback};
use fetchcore::config::DownloaderConfig;
use fetchcore::downloader::{Connection, Transport};
use fetchcore::task::{MemoryTask, TaskExt};
use fetchcore::{DownloadError, DownloadTask, Locator, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// What the transport does for one `open` call
#[derive(Clone)]
pub enum Reply {
    Body(Bytes),
    Fail(DownloadError),
    /// Never answers; only cancellation ends the attempt
    Hang,
    After(Duration, Box<Reply>),
}

impl Reply {
    pub fn body(data: &'static str) -> Self {
        Reply::Body(Bytes::from_static(data.as_bytes()))
    }

    pub fn reset() -> Self {
        Reply::Fail(DownloadError::Transport("connection reset".to_string()))
    }

    pub fn not_found() -> Self {
        Reply::Fail(DownloadError::HttpStatus {
            status: 404,
            reason: "Not Found".to_string(),
        })
    }

    pub fn after(millis: u64, reply: Reply) -> Self {
        Reply::After(Duration::from_millis(millis), Box::new(reply))
    }
}

/// Transport answering from per-locator scripts
///
/// Scripted replies are consumed in order; once a script is exhausted the
/// locator's standing reply is used. Unknown locators get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    standing: Mutex<HashMap<String, Reply>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, locator: &str, reply: Reply) -> Self {
        self.standing.lock().insert(locator.to_string(), reply);
        self
    }

    pub fn script(self, locator: &str, replies: Vec<Reply>) -> Self {
        self.scripts.lock().insert(locator.to_string(), replies.into());
        self
    }

    pub fn opened(&self, locator: &str) -> usize {
        self.opened.lock().iter().filter(|l| l.as_str() == locator).count()
    }

    pub fn total_opened(&self) -> usize {
        self.opened.lock().len()
    }

    fn next_reply(&self, locator: &str) -> Reply {
        if let Some(reply) = self.scripts.lock().get_mut(locator).and_then(|s| s.pop_front()) {
            return reply;
        }
        self.standing
            .lock()
            .get(locator)
            .cloned()
            .unwrap_or_else(Reply::not_found)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, locator: &Locator) -> Result<Connection> {
        self.opened.lock().push(locator.as_str().to_string());

        let mut reply = self.next_reply(locator.as_str());
        loop {
            match reply {
                Reply::Body(data) => return Ok(Connection::from_bytes(data)),
                Reply::Fail(e) => return Err(e),
                Reply::Hang => std::future::pending::<()>().await,
                Reply::After(delay, next) => {
                    tokio::time::sleep(delay).await;
                    reply = *next;
                }
            }
        }
    }
}

/// Downloader settings without backoff sleeps
pub fn fast_config() -> DownloaderConfig {
    DownloaderConfig {
        retry_backoff_ms: 0,
        max_retry_backoff_ms: 0,
        ..DownloaderConfig::default()
    }
}

pub fn bytes_task(locator: &str) -> Arc<dyn DownloadTask<Bytes>> {
    Arc::new(MemoryTask::new(locator))
}

/// Cacheable task parsing the body as a decimal number
pub fn number_task(locator: &str) -> Arc<dyn DownloadTask<u32>> {
    Arc::new(
        MemoryTask::new(locator)
            .map(|bytes| {
                std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
                    .ok_or_else(|| DownloadError::session("body is not a number"))
            })
            .cacheable(),
    )
}

/// Ordered event log shared by recorders
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: String) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.as_str() == event)
    }

    /// Events starting with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Callback writing `<name>:<event>` entries into an [`EventLog`]
///
/// As a composite callback it records `<name>:start:<locator>` and hands out
/// a child recorder named `<name>/<locator>`.
pub struct Recorder {
    name: String,
    log: EventLog,
}

impl Recorder {
    pub fn new(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
        })
    }

    fn record(&self, event: impl std::fmt::Display) {
        self.log.push(format!("{}:{}", self.name, event));
    }
}

impl<T> Callback<T> for Recorder {
    fn done(&self, _result: &T) {
        self.record("done");
    }

    fn failed(&self, error: &DownloadError) {
        self.record(format_args!("failed:{}", error));
    }

    fn cancelled(&self) {
        self.record("cancelled");
    }
}

impl<T> DownloadCallback<T> for Recorder {
    fn retry(&self, _error: &DownloadError, attempt: u32, max_attempts: u32) {
        self.record(format_args!("retry:{}/{}", attempt, max_attempts));
    }
}

impl<T> CombinedCallback<T> for Recorder {
    fn task_start(&self, locator: &Locator) -> Option<Arc<dyn ChildCallback>> {
        self.record(format_args!("start:{}", locator));
        Some(Arc::new(ChildRecorder {
            name: format!("{}/{}", self.name, locator),
            log: self.log.clone(),
        }))
    }
}

struct ChildRecorder {
    name: String,
    log: EventLog,
}

impl ChildCallback for ChildRecorder {
    fn done(&self, _result: &dyn Any) {
        self.log.push(format!("{}:done", self.name));
    }

    fn failed(&self, error: &DownloadError) {
        self.log.push(format!("{}:failed:{}", self.name, error));
    }

    fn cancelled(&self) {
        self.log.push(format!("{}:cancelled", self.name));
    }

    fn retry(&self, _error: &DownloadError, attempt: u32, max_attempts: u32) {
        self.log.push(format!("{}:retry:{}/{}", self.name, attempt, max_attempts));
    }
}

/// Poll `condition` until it holds or a second has passed
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
