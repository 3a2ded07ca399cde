//! Asynchronous download handles
//!
//! A [`DownloadHandle`] is a future resolving to the download's result. Its
//! producer side, [`Completer`], is held by whoever runs the download and is
//! the only place where the handle's callback fires, which keeps the
//! terminal notification exactly-once even when `cancel()` races with
//! completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::callback::Callback;
use crate::error::{DownloadError, Result};

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
struct HandleControl {
    state: AtomicU8,
    token: CancellationToken,
}

impl HandleControl {
    fn new(state: u8, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(state),
            token,
        })
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn cancel(&self) -> bool {
        if self.transition(CANCELLED) {
            self.token.cancel();
            true
        } else {
            false
        }
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

pub struct DownloadHandle<T> {
    control: Arc<HandleControl>,
    result: BoxFuture<'static, Result<T>>,
}

impl<T: Send + 'static> DownloadHandle<T> {
    /// Create a pending handle and its producer side. Cancelling the handle
    /// cancels `token`.
    pub(crate) fn pending(token: CancellationToken) -> (Self, Completer<T>) {
        let control = HandleControl::new(PENDING, token);
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            control: Arc::clone(&control),
            result: rx
                .map(|received| received.unwrap_or(Err(DownloadError::Abandoned)))
                .boxed(),
        };
        (
            handle,
            Completer {
                control,
                tx: Some(tx),
            },
        )
    }

    /// An already-resolved handle
    pub fn ready(value: T) -> Self {
        Self {
            control: HandleControl::new(COMPLETED, CancellationToken::new()),
            result: future::ready(Ok(value)).boxed(),
        }
    }
}

impl<T> DownloadHandle<T> {
    /// Request cancellation. Returns false if the download already finished
    /// or was cancelled before.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.state() == CANCELLED
    }

    pub fn is_done(&self) -> bool {
        self.control.state() != PENDING
    }

    /// Block the current thread until the download resolves.
    ///
    /// Meant for synchronous callers; do not call it from an async task.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for DownloadHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.result.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for DownloadHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadHandle")
            .field("state", &self.control.state())
            .finish_non_exhaustive()
    }
}

/// Producer side of a [`DownloadHandle`]
///
/// Dropping it without calling [`resolve`](Completer::resolve) resolves the
/// handle to [`DownloadError::Abandoned`].
pub(crate) struct Completer<T> {
    control: Arc<HandleControl>,
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> Completer<T> {
    /// Token cancelled by `DownloadHandle::cancel`
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.control.token
    }

    /// Fire the terminal notification and resolve the handle.
    ///
    /// A cancellation that won the race replaces any other outcome.
    pub(crate) fn resolve<C>(mut self, outcome: Result<T>, callback: Option<&C>)
    where
        C: Callback<T> + ?Sized,
    {
        let outcome = match outcome {
            Err(DownloadError::Cancelled) => {
                self.control.transition(CANCELLED);
                Err(DownloadError::Cancelled)
            }
            other if self.control.transition(COMPLETED) => other,
            _ => Err(DownloadError::Cancelled),
        };

        if let Some(callback) = callback {
            match &outcome {
                Ok(value) => callback.done(value),
                Err(DownloadError::Cancelled) => callback.cancelled(),
                Err(e) => callback.failed(e),
            }
        }

        if let Some(tx) = self.tx.take() {
            // Receiver gone means nobody awaits the handle.
            let _ = tx.send(outcome);
        }
    }
}
