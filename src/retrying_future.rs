//! A future that retries an operation which itself returns a future

use crate::errors::RetryingFutureError;
use futures::future::BoxFuture;
use futures::task::AtomicWaker;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tracing::debug;

type Task<T, E> = Box<dyn FnMut() -> BoxFuture<'static, Result<T, E>> + Send>;
type Accept<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

/// Cancels a [`RetryingFuture`] from anywhere.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Request cancellation and wake the retrying future. Its next poll drops
    /// the in-flight inner future and completes with `Cancelled`.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.waker.wake();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Retries an async operation until it yields an acceptable value
///
/// Each attempt calls `task` for a fresh inner future. A success whose value
/// the predicate accepts completes the outer future. A rejected value or an
/// error consumes one retry; once none remain the outer future fails with
/// [`RetryingFutureError::Rejected`] (carrying the last value) or
/// [`RetryingFutureError::Failed`]. Polling never blocks.
///
/// # Examples
///
/// ```
/// use resilient_pool::RetryingFuture;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let calls = Arc::new(AtomicU32::new(0));
/// let counter = Arc::clone(&calls);
///
/// let future = RetryingFuture::new(3, move || {
///     let n = counter.fetch_add(1, Ordering::SeqCst);
///     async move { Ok::<u32, std::io::Error>(n) }
/// })
/// .accept_if(|n| *n >= 2);
///
/// assert_eq!(rt.block_on(future).unwrap(), 2);
/// assert_eq!(calls.load(Ordering::SeqCst), 3);
/// ```
pub struct RetryingFuture<T, E> {
    task: Task<T, E>,
    accept: Accept<T>,
    current: Option<BoxFuture<'static, Result<T, E>>>,
    retries_remaining: usize,
    attempts: usize,
    cancel: Arc<CancelState>,
    finished: bool,
}

impl<T, E> RetryingFuture<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Up to `max_retries` retries after the first attempt. Every successful
    /// value is accepted until [`accept_if`](Self::accept_if) narrows it.
    pub fn new<F, Fut>(max_retries: usize, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            task: Box::new(move || Box::pin(task())),
            accept: Box::new(|_: &T| true),
            current: None,
            retries_remaining: max_retries,
            attempts: 0,
            cancel: Arc::new(CancelState::default()),
            finished: false,
        }
    }

    /// Value-acceptance predicate applied to each successful inner result.
    pub fn accept_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.accept = Box::new(predicate);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.cancel),
        }
    }

    /// Cancel now, dropping the in-flight inner future immediately.
    pub fn cancel(&mut self) {
        self.cancel.cancelled.store(true, Ordering::Release);
        self.current.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.cancelled.load(Ordering::Acquire)
    }

    /// Inner futures issued so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl<T, E> Future for RetryingFuture<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<T, RetryingFutureError<T, E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.finished {
            panic!("RetryingFuture polled after completion");
        }

        this.cancel.waker.register(cx.waker());
        loop {
            if this.is_cancelled() {
                this.current.take();
                this.finished = true;
                debug!(attempts = this.attempts, "retrying future cancelled");
                return Poll::Ready(Err(RetryingFutureError::Cancelled));
            }

            let attempts = &mut this.attempts;
            let task = &mut this.task;
            let inner = this.current.get_or_insert_with(|| {
                *attempts += 1;
                task()
            });

            let outcome = match inner.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(outcome) => outcome,
            };
            this.current = None;

            match outcome {
                Ok(value) if (this.accept)(&value) => {
                    this.finished = true;
                    return Poll::Ready(Ok(value));
                }
                Ok(value) => {
                    if this.retries_remaining == 0 {
                        this.finished = true;
                        return Poll::Ready(Err(RetryingFutureError::Rejected {
                            value,
                            attempts: this.attempts,
                        }));
                    }
                    this.retries_remaining -= 1;
                    debug!(attempt = this.attempts, "value rejected, retrying");
                }
                Err(source) => {
                    if this.retries_remaining == 0 {
                        this.finished = true;
                        return Poll::Ready(Err(RetryingFutureError::Failed {
                            source,
                            attempts: this.attempts,
                        }));
                    }
                    this.retries_remaining -= 1;
                    debug!(attempt = this.attempts, "inner future failed, retrying");
                }
            }
        }
    }
}
