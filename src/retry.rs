//! Bounded synchronous (and async) retry with backoff and error filtering

use crate::backoff::{BackoffPolicy, NoBackoff};
use crate::errors::RetryError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Re-runs a failing task up to `max_retries` more times
///
/// Attempt 0 runs immediately. After a failure, if attempts remain and the
/// filter accepts the error, the backoff policy is consulted and the task
/// runs again. The worst case is `max_retries + 1` executions.
///
/// # Examples
///
/// ```
/// use resilient_pool::{FixedBackoff, Retryer};
/// use std::time::Duration;
///
/// let retryer = Retryer::<String>::builder()
///     .max_retries(3)
///     .backoff(FixedBackoff::new(Duration::from_millis(1)))
///     .build();
///
/// let mut calls = 0;
/// let value = retryer.submit_with_retry(|| {
///     calls += 1;
///     if calls < 3 { Err(format!("attempt {} failed", calls)) } else { Ok(calls) }
/// });
/// assert_eq!(value, Ok(3));
/// ```
pub struct Retryer<E> {
    max_retries: usize,
    backoff: Arc<dyn BackoffPolicy>,
    retry_on: RetryPredicate<E>,
    name: String,
}

impl<E> Clone for Retryer<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            backoff: Arc::clone(&self.backoff),
            retry_on: Arc::clone(&self.retry_on),
            name: self.name.clone(),
        }
    }
}

impl<E> fmt::Debug for Retryer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retryer")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl<E> Retryer<E> {
    pub fn builder() -> RetryerBuilder<E> {
        RetryerBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Returns the first success, or the last error unchanged.
    pub fn submit_with_retry<T, F>(&self, task: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.run(task, |_| true).map_err(RetryError::into_inner)
    }

    /// Run a side-effecting task; any final failure is wrapped in [`RetryError`].
    pub fn submit_runnable<F>(&self, task: F) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Result<(), E>,
    {
        self.run(task, |_| true)
    }

    /// Like [`submit_runnable`](Self::submit_runnable), yielding `result` on success.
    pub fn submit_runnable_with_result<T, F>(&self, task: F, result: T) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<(), E>,
    {
        self.run(task, |_| true).map(|()| result)
    }

    /// Async variant; sleeps on the tokio timer between attempts. Dropping
    /// the returned future abandons any pending backoff.
    pub async fn submit_with_retry_async<T, F, Fut>(&self, mut task: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match task().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.should_retry(attempt, &error) {
                        self.log_give_up(attempt);
                        return Err(error);
                    }
                    let delay = self.backoff.delay(attempt);
                    debug!(retryer = %self.name, attempt, ?delay, "retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Wrap a function so that every call goes through this retryer.
    pub fn decorate<A, T, F>(&self, f: F) -> RetryingFn<F, E>
    where
        F: Fn(A) -> Result<T, E>,
        A: Clone,
    {
        RetryingFn {
            f,
            retryer: self.clone(),
        }
    }

    /// Wrap a target so that each call made through [`RetryProxy::call`]
    /// is retried.
    pub fn proxy<S>(&self, target: S) -> RetryProxy<S, E> {
        RetryProxy {
            target,
            retryer: self.clone(),
        }
    }

    /// Loop shared by every submit flavour. `also` narrows the configured
    /// filter for a single submission.
    pub(crate) fn run<T, F, P>(&self, mut task: F, also: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match task() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !also(&error) || !self.should_retry(attempt, &error) {
                        self.log_give_up(attempt);
                        return Err(RetryError {
                            attempts: attempt + 1,
                            source: error,
                        });
                    }
                    debug!(retryer = %self.name, attempt, "retrying after failure");
                    self.backoff.backoff(attempt);
                    attempt += 1;
                }
            }
        }
    }

    fn should_retry(&self, attempt: usize, error: &E) -> bool {
        attempt < self.max_retries && (self.retry_on)(error)
    }

    fn log_give_up(&self, attempt: usize) {
        if attempt >= self.max_retries && self.max_retries > 0 {
            warn!(retryer = %self.name, attempts = attempt + 1, "retries exhausted");
        } else {
            debug!(retryer = %self.name, attempts = attempt + 1, "error not retried");
        }
    }
}

/// Function decorated by [`Retryer::decorate`].
pub struct RetryingFn<F, E> {
    f: F,
    retryer: Retryer<E>,
}

impl<F, E> RetryingFn<F, E> {
    pub fn call<A, T>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        A: Clone,
    {
        self.retryer
            .submit_with_retry(|| (self.f)(args.clone()))
    }
}

/// Target wrapped by [`Retryer::proxy`].
///
/// # Examples
///
/// ```
/// use resilient_pool::Retryer;
/// use std::cell::Cell;
///
/// struct Flaky { failures_left: Cell<u32> }
///
/// impl Flaky {
///     fn fetch(&self, key: &str) -> Result<String, String> {
///         if self.failures_left.get() > 0 {
///             self.failures_left.set(self.failures_left.get() - 1);
///             return Err("timeout".into());
///         }
///         Ok(format!("value of {}", key))
///     }
/// }
///
/// let proxy = Retryer::builder().max_retries(2).build().proxy(Flaky { failures_left: Cell::new(2) });
/// assert_eq!(proxy.call(|t| t.fetch("k")), Ok("value of k".to_string()));
/// ```
pub struct RetryProxy<S, E> {
    target: S,
    retryer: Retryer<E>,
}

impl<S, E> RetryProxy<S, E> {
    pub fn call<T, F>(&self, method: F) -> Result<T, E>
    where
        F: Fn(&S) -> Result<T, E>,
    {
        self.retryer.submit_with_retry(|| method(&self.target))
    }

    pub fn target(&self) -> &S {
        &self.target
    }

    pub fn into_inner(self) -> S {
        self.target
    }
}

/// Builder for [`Retryer`].
pub struct RetryerBuilder<E> {
    max_retries: usize,
    backoff: Arc<dyn BackoffPolicy>,
    retry_on: RetryPredicate<E>,
    name: String,
}

impl<E> Default for RetryerBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryerBuilder<E> {
    /// Defaults: 3 retries, no backoff, every error retried.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            backoff: Arc::new(NoBackoff),
            retry_on: Arc::new(|_: &E| true),
            name: "<unnamed>".to_string(),
        }
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff<B: BackoffPolicy + 'static>(mut self, backoff: B) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Only errors matching `predicate` are retried.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn build(self) -> Retryer<E> {
        Retryer {
            max_retries: self.max_retries,
            backoff: self.backoff,
            retry_on: self.retry_on,
            name: self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedBackoff;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Transient(usize),
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl std::error::Error for TestError {}

    fn retryer(max_retries: usize) -> Retryer<TestError> {
        Retryer::builder().max_retries(max_retries).build()
    }

    #[test]
    fn test_succeeds_on_fifth_attempt() {
        let calls = Cell::new(0);
        let result = retryer(5).submit_with_retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() <= 4 {
                Err(TestError::Transient(calls.get()))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_always_failing_runs_max_retries_plus_one() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retryer(5).submit_with_retry(|| {
            calls.set(calls.get() + 1);
            Err(TestError::Transient(calls.get()))
        });
        assert_eq!(result, Err(TestError::Transient(6)));
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn test_filter_stops_retrying() {
        let calls = Cell::new(0);
        let retryer = Retryer::builder()
            .max_retries(5)
            .retry_on(|e: &TestError| matches!(e, TestError::Transient(_)))
            .build();
        let result: Result<(), _> = retryer.submit_with_retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() == 2 {
                Err(TestError::Fatal)
            } else {
                Err(TestError::Transient(calls.get()))
            }
        });
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_zero_retries_runs_once() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retryer(0).submit_with_retry(|| {
            calls.set(calls.get() + 1);
            Err(TestError::Fatal)
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_runnable_failure_is_wrapped() {
        let err = retryer(2)
            .submit_runnable(|| Err(TestError::Fatal))
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.source, TestError::Fatal);
        assert!(err.to_string().contains("3 attempt(s)"));

        let calls = Cell::new(0);
        let value = retryer(2)
            .submit_runnable_with_result(
                || {
                    calls.set(calls.get() + 1);
                    if calls.get() == 1 { Err(TestError::Fatal) } else { Ok(()) }
                },
                "result",
            )
            .unwrap();
        assert_eq!(value, "result");
    }

    #[test]
    fn test_backoff_is_consulted_between_attempts() {
        let retryer = Retryer::builder()
            .max_retries(2)
            .backoff(FixedBackoff::new(Duration::from_millis(20)))
            .build();
        let started = std::time::Instant::now();
        let _: Result<(), TestError> = retryer.submit_with_retry(|| Err(TestError::Fatal));
        assert!(started.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn test_decorate() {
        let calls = AtomicUsize::new(0);
        let lookup = retryer(3).decorate(|key: String| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError::Transient(0))
            } else {
                Ok(key.len())
            }
        });
        assert_eq!(lookup.call("abcd".to_string()), Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_proxy_passes_through_errors_as_is() {
        struct Store;
        impl Store {
            fn get(&self) -> Result<u8, TestError> {
                Err(TestError::Fatal)
            }
        }
        let proxy = retryer(1).proxy(Store);
        assert_eq!(proxy.call(Store::get), Err(TestError::Fatal));
    }

    #[tokio::test]
    async fn test_async_retry() {
        let calls = AtomicUsize::new(0);
        let retryer = Retryer::builder()
            .max_retries(3)
            .backoff(FixedBackoff::new(Duration::from_millis(1)))
            .build();
        let result = retryer
            .submit_with_retry_async(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 { Err(TestError::Transient(n)) } else { Ok(n) }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_async_backoff_cancelled_by_drop() {
        let retryer: Retryer<TestError> = Retryer::builder()
            .max_retries(1)
            .backoff(FixedBackoff::new(Duration::from_secs(3600)))
            .build();
        let pending = retryer.submit_with_retry_async(|| async { Err::<(), _>(TestError::Fatal) });
        let outcome = tokio::time::timeout(Duration::from_secs(1), pending).await;
        assert!(outcome.is_err());
    }
}
