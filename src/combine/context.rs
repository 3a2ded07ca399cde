use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::CombinedTask;
use super::erased::{AnyTask, AnyValue, ErasedDownloader, RetryRelay, UnitObserver, downcast};
use crate::callback::{Callback, ChildCallback, CombinedCallback, DownloadCallback};
use crate::error::{DownloadError, Result};
use crate::handle::{Completer, DownloadHandle};
use crate::task::{DownloadTask, Locator};

/// `task_start` of one enclosing composite callback
pub(crate) type StartHook = Arc<dyn Fn(&Locator) -> Option<Arc<dyn ChildCallback>> + Send + Sync>;

pub(crate) fn start_hook<R: 'static>(callback: &Arc<dyn CombinedCallback<R>>) -> StartHook {
    let callback = Arc::clone(callback);
    Arc::new(move |locator: &Locator| callback.task_start(locator))
}

/// Resources shared by every context of one combined downloader
pub(crate) struct Environment {
    pub(crate) downloader: Arc<dyn ErasedDownloader>,
    pub(crate) pool: Arc<Semaphore>,
    pub(crate) tracker: TaskTracker,
    pub(crate) runtime: Handle,
}

#[derive(Debug, Default)]
struct UnitState {
    /// Units submitted and not yet terminal
    pending: usize,
    /// Fatal units among `pending`
    pending_fatal: usize,
    fatal_error: Option<DownloadError>,
    /// No more submissions accepted
    closed: bool,
}

struct ContextInner {
    env: Arc<Environment>,
    token: CancellationToken,
    hooks: Vec<StartHook>,
    tries: u32,
    state: watch::Sender<UnitState>,
}

/// Execution environment handed to a [`CombinedTask`] body
///
/// Units submitted here (async work, downloads, nested composite tasks) run
/// concurrently. A unit submitted with `fatal = true` fails the whole
/// composite when it fails; other units only notify their own callbacks.
/// Cloning is cheap, so the context can be moved into submitted work.
#[derive(Clone)]
pub struct CombinedContext {
    inner: Arc<ContextInner>,
}

impl CombinedContext {
    pub(crate) fn new(env: Arc<Environment>, token: CancellationToken, hooks: Vec<StartHook>, tries: u32) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                env,
                token,
                hooks,
                tries,
                state: watch::Sender::new(UnitState::default()),
            }),
        }
    }

    /// Run async work on the shared worker pool.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Interrupted`] once the composite is finishing, failed
    /// or cancelled.
    pub fn submit<R, F>(&self, work: F, callback: Option<Arc<dyn Callback<R>>>, fatal: bool) -> Result<DownloadHandle<R>>
    where
        R: Send + 'static,
        F: Future<Output = Result<R>> + Send + 'static,
    {
        let (handle, completer) = self.register(fatal)?;
        let token = completer.token().clone();
        let pool = Arc::clone(&self.inner.env.pool);

        self.spawn_unit(completer, fatal, callback, run_pooled(pool, token, work));
        Ok(handle)
    }

    /// Download `task` as a child of this composite.
    ///
    /// Every enclosing composite callback sees `task_start` before this call
    /// returns; the observers it hands out are driven for this child along
    /// with `callback`.
    pub fn submit_download<R>(
        &self,
        task: Arc<dyn DownloadTask<R>>,
        callback: Option<Arc<dyn DownloadCallback<R>>>,
        fatal: bool,
    ) -> Result<DownloadHandle<R>>
    where
        R: Send + 'static,
    {
        let (handle, completer) = self.register(fatal)?;

        let children: Vec<Arc<dyn ChildCallback>> = self
            .inner
            .hooks
            .iter()
            .filter_map(|hook| hook(task.locator()))
            .collect();
        let observer = Arc::new(UnitObserver::new(callback, children));
        let relay: Arc<dyn DownloadCallback<AnyValue>> = Arc::new(RetryRelay(Arc::clone(&observer)));

        debug!(locator = %task.locator(), fatal, "Child download submitted");
        let started = self.inner.env.downloader.download_any(
            Arc::new(AnyTask::new(task)),
            Some(relay),
            self.inner.tries,
        );

        let token = completer.token().clone();
        self.spawn_unit(completer, fatal, Some(observer), follow_download(started, token));
        Ok(handle)
    }

    /// Run a nested composite task inside this one.
    ///
    /// Downloads of the nested task also report `task_start` to this
    /// composite's callbacks.
    pub fn submit_combined<R>(
        &self,
        task: Arc<dyn CombinedTask<R>>,
        callback: Option<Arc<dyn CombinedCallback<R>>>,
        fatal: bool,
    ) -> Result<DownloadHandle<R>>
    where
        R: Send + 'static,
    {
        let (handle, completer) = self.register(fatal)?;

        let mut hooks = self.inner.hooks.clone();
        if let Some(callback) = &callback {
            hooks.push(start_hook(callback));
        }
        let nested = CombinedContext::new(
            Arc::clone(&self.inner.env),
            completer.token().child_token(),
            hooks,
            self.inner.tries,
        );

        debug!(fatal, "Nested composite submitted");
        self.spawn_unit(completer, fatal, callback, drive(task, nested));
        Ok(handle)
    }

    /// Wait until every unit submitted so far reached a terminal state.
    ///
    /// Code after this call is the composite's completion step.
    ///
    /// # Errors
    ///
    /// Returns early with the error of a failed fatal unit, or
    /// [`DownloadError::Cancelled`] if the composite was cancelled.
    pub async fn await_all_tasks(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => Err(DownloadError::Cancelled),
            outcome = self.settled(|s| s.pending == 0) => match outcome? {
                Some(fatal) => Err(fatal),
                None => Ok(()),
            },
        }
    }

    /// Whether the composite was cancelled or is being torn down
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Error of the fatal unit that failed this composite, if any
    pub fn failure(&self) -> Option<DownloadError> {
        self.inner.state.borrow().fatal_error.clone()
    }

    /// Units submitted and not yet finished
    pub fn pending(&self) -> usize {
        self.inner.state.borrow().pending
    }

    fn register<R: Send + 'static>(&self, fatal: bool) -> Result<(DownloadHandle<R>, Completer<R>)> {
        let mut accepted = false;
        self.inner.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.pending += 1;
            if fatal {
                state.pending_fatal += 1;
            }
            accepted = true;
            true
        });

        if !accepted {
            return Err(DownloadError::Interrupted);
        }
        Ok(DownloadHandle::pending(self.inner.token.child_token()))
    }

    fn finish_unit(&self, fatal: bool, error: Option<DownloadError>) {
        self.inner.state.send_modify(|state| {
            state.pending -= 1;
            if !fatal {
                return;
            }
            state.pending_fatal -= 1;
            if let Some(error) = error {
                if !error.is_cancelled() && state.fatal_error.is_none() {
                    warn!(error = %error, "Fatal unit failed, failing composite");
                    state.fatal_error = Some(error);
                    state.closed = true;
                }
            }
        });
    }

    fn spawn_unit<R, C, Fut>(&self, completer: Completer<R>, fatal: bool, observer: Option<Arc<C>>, work: Fut)
    where
        R: Send + 'static,
        C: Callback<R> + ?Sized + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let mut settle = Settle {
            context: self.clone(),
            fatal,
            error: Some(DownloadError::session("unit panicked before completing")),
        };
        self.inner.env.tracker.spawn_on(
            async move {
                let outcome = work.await;
                settle.error = outcome.as_ref().err().cloned();
                completer.resolve(outcome, observer.as_deref());
                drop(settle);
            },
            &self.inner.env.runtime,
        );
    }

    /// Wait for `ready` or a fatal failure; yields the fatal error if any
    async fn settled(&self, ready: impl Fn(&UnitState) -> bool) -> Result<Option<DownloadError>> {
        let mut rx = self.inner.state.subscribe();
        let fatal = rx
            .wait_for(|state| ready(state) || state.fatal_error.is_some())
            .await
            .map_err(|_| DownloadError::Abandoned)?
            .fatal_error
            .clone();
        Ok(fatal)
    }

    async fn fatal_failure(&self) -> DownloadError {
        match self.settled(|_| false).await {
            Ok(Some(error)) => error,
            _ => std::future::pending().await,
        }
    }

    async fn run_body<R>(&self, task: Arc<dyn CombinedTask<R>>) -> Result<R>
    where
        R: Send + 'static,
    {
        let value = AssertUnwindSafe(task.run(self.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(DownloadError::session("composite body panicked")))?;
        if let Some(fatal) = self.settled(|s| s.pending_fatal == 0).await? {
            return Err(fatal);
        }
        Ok(value)
    }

    /// Reject new units, cancel the remaining ones and wait for them
    async fn teardown(&self) {
        self.inner.state.send_modify(|state| state.closed = true);

        let leftovers = self.pending();
        if leftovers > 0 {
            debug!(leftovers, "Cancelling outstanding units");
        }
        self.inner.token.cancel();

        let mut rx = self.inner.state.subscribe();
        // The sender lives in `self`, so this only returns once drained.
        let _ = rx.wait_for(|state| state.pending == 0).await;
    }
}

/// Marks a unit terminal when dropped, so a panicking callback still
/// releases the unit's slot in the context
struct Settle {
    context: CombinedContext,
    fatal: bool,
    error: Option<DownloadError>,
}

impl Drop for Settle {
    fn drop(&mut self) {
        self.context.finish_unit(self.fatal, self.error.take());
    }
}

/// Run a composite task body to completion inside `context`
///
/// Resolves to the body's value once the body and all fatal units finished.
/// Cancellation and fatal failures win over the body; in every case the
/// context is torn down before this returns, so no unit outlives it.
pub(crate) async fn drive<R>(task: Arc<dyn CombinedTask<R>>, context: CombinedContext) -> Result<R>
where
    R: Send + 'static,
{
    let outcome = tokio::select! {
        biased;
        _ = context.inner.token.cancelled() => Err(DownloadError::Cancelled),
        fatal = context.fatal_failure() => Err(fatal),
        result = context.run_body(task) => result,
    };

    context.teardown().await;
    outcome
}

async fn run_pooled<R, F>(pool: Arc<Semaphore>, token: CancellationToken, work: F) -> Result<R>
where
    F: Future<Output = Result<R>> + Send,
{
    let _permit = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(DownloadError::Cancelled),
        permit = pool.acquire_owned() => permit.map_err(|_| DownloadError::Rejected)?,
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DownloadError::Cancelled),
        outcome = AssertUnwindSafe(work).catch_unwind() => {
            outcome.unwrap_or_else(|_| Err(DownloadError::session("submitted work panicked")))
        }
    }
}

async fn follow_download<R>(started: Result<DownloadHandle<AnyValue>>, token: CancellationToken) -> Result<R>
where
    R: Send + 'static,
{
    let mut download = started?;

    let value = tokio::select! {
        biased;
        _ = token.cancelled() => {
            download.cancel();
            (&mut download).await
        }
        value = &mut download => value,
    }?;

    downcast(value)
}
