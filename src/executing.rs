//! Borrow, run, return: units of work executed against pooled resources

use crate::errors::{BoxError, PoolError, PoolResult};
use crate::pool::Pool;
use crate::retry::Retryer;
use std::time::Duration;
use tracing::debug;

/// Runs a unit of work against a resource borrowed from `P`
///
/// When the work fails, the resource goes back together with the error so
/// the factory can decide its fate, and the error surfaces to the caller as
/// [`PoolError::Work`]. A panic inside the work still returns the resource.
///
/// # Examples
///
/// ```
/// use resilient_pool::{ExecutingPool, FnFactory, InlineExecutor, Pool, PoolConfiguration, SinglePool};
///
/// let pool = SinglePool::builder(FnFactory::new(|| Ok(Vec::<u32>::new())))
///     .config(PoolConfiguration::new().with_max_pool_size(1))
///     .executor(InlineExecutor)
///     .build()
///     .unwrap();
/// pool.start().unwrap();
///
/// let executing = ExecutingPool::new(pool);
/// let len = executing
///     .execute(|buf| {
///         buf.push(7);
///         Ok::<_, std::io::Error>(buf.len())
///     })
///     .unwrap();
/// assert_eq!(len, Some(1));
/// ```
pub struct ExecutingPool<P> {
    pool: P,
}

impl<P: Pool> ExecutingPool<P> {
    pub fn new(pool: P) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn into_inner(self) -> P {
        self.pool
    }

    /// Run `work` on an immediately available resource. `Ok(None)` means
    /// none was available and nothing ran.
    pub fn execute<R, E, F>(&self, work: F) -> PoolResult<Option<R>>
    where
        F: FnOnce(&mut P::Item) -> Result<R, E>,
        E: Into<BoxError>,
    {
        self.execute_timeout(Duration::ZERO, work)
    }

    /// Like [`execute`](Self::execute), waiting up to `timeout` for a resource.
    pub fn execute_timeout<R, E, F>(&self, timeout: Duration, work: F) -> PoolResult<Option<R>>
    where
        F: FnOnce(&mut P::Item) -> Result<R, E>,
        E: Into<BoxError>,
    {
        let Some(mut lease) = self.pool.lease(timeout)? else {
            return Ok(None);
        };

        match work(&mut lease) {
            Ok(result) => {
                lease.release()?;
                Ok(Some(result))
            }
            Err(e) => {
                let error = e.into();
                if let Err(return_err) = lease.fail(&error) {
                    debug!(error = %return_err, "failed resource could not be returned");
                }
                Err(PoolError::Work(error))
            }
        }
    }
}

/// [`ExecutingPool`] whose whole borrow/run/return cycle is retried
///
/// Finding no resource counts as a failed attempt ([`PoolError::PoolEmpty`])
/// and so does a failing unit of work. A closed pool is never retried.
pub struct RetryingExecutingPool<P> {
    inner: ExecutingPool<P>,
    retryer: Retryer<PoolError>,
    timeout: Duration,
}

impl<P: Pool> RetryingExecutingPool<P> {
    pub fn new(pool: P, retryer: Retryer<PoolError>) -> Self {
        Self {
            inner: ExecutingPool::new(pool),
            retryer,
            timeout: Duration::ZERO,
        }
    }

    /// Borrow timeout applied on every attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool(&self) -> &P {
        self.inner.pool()
    }

    pub fn retryer(&self) -> &Retryer<PoolError> {
        &self.retryer
    }

    /// Run `work` until one cycle succeeds or retries are exhausted; the
    /// final error is returned as is.
    pub fn execute<R, E, F>(&self, mut work: F) -> PoolResult<R>
    where
        F: FnMut(&mut P::Item) -> Result<R, E>,
        E: Into<BoxError>,
    {
        self.retryer
            .run(
                || match self.inner.execute_timeout(self.timeout, &mut work)? {
                    Some(result) => Ok(result),
                    None => Err(PoolError::PoolEmpty),
                },
                |error| !error.is_closed(),
            )
            .map_err(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{BackoffPolicy, FixedBackoff};
    use crate::config::PoolConfiguration;
    use crate::executor::InlineExecutor;
    use crate::factory::{FnFactory, Validation};
    use crate::single::SinglePool;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(max: usize) -> SinglePool<usize> {
        let next = Arc::new(AtomicUsize::new(0));
        let factory = FnFactory::new(move || Ok(next.fetch_add(1, Ordering::SeqCst)))
            .with_validation(|_, error| match error {
                Some(_) => Validation::Invalid,
                None => Validation::Valid,
            });
        let pool = SinglePool::builder(factory)
            .config(
                PoolConfiguration::new()
                    .with_max_pool_size(max)
                    .with_core_pool_size(max),
            )
            .executor(InlineExecutor)
            .build()
            .unwrap();
        pool.start().unwrap();
        pool
    }

    fn retryer(max_retries: usize) -> Retryer<PoolError> {
        Retryer::builder()
            .max_retries(max_retries)
            .backoff(FixedBackoff::new(Duration::from_millis(1)))
            .build()
    }

    #[test]
    fn test_success_returns_resource() {
        let executing = ExecutingPool::new(pool(1));
        let result = executing.execute(|item| Ok::<_, BoxError>(*item * 10)).unwrap();
        assert_eq!(result, Some(0));
        assert_eq!(executing.pool().size(), 1);
        assert_eq!(executing.pool().active_count(), 1);
    }

    #[test]
    fn test_no_resource_runs_nothing() {
        let executing = ExecutingPool::new(pool(1));
        let held = executing.pool().borrow().unwrap().unwrap();

        let ran = AtomicUsize::new(0);
        let result = executing
            .execute(|_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .unwrap();
        assert!(result.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        executing.pool().return_to_pool(held).unwrap();
    }

    #[test]
    fn test_failure_invalidates_and_reraises() {
        let executing = ExecutingPool::new(pool(1));
        let err = executing
            .execute(|_| Err::<(), _>("connection reset"))
            .unwrap_err();
        match err {
            PoolError::Work(source) => assert_eq!(source.to_string(), "connection reset"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(executing.pool().active_count(), 0);
        assert_eq!(executing.pool().metrics().invalidated, 1);
    }

    #[test]
    fn test_panicking_work_still_returns_resource() {
        let executing = ExecutingPool::new(pool(1));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = executing.execute(|_| -> Result<(), BoxError> { panic!("boom") });
        }));
        assert!(outcome.is_err());
        assert_eq!(executing.pool().size(), 1);
    }

    #[test]
    fn test_closed_pool_is_reported() {
        let executing = ExecutingPool::new(pool(1));
        executing.pool().stop().unwrap();
        let err = executing.execute(|_| Ok::<_, BoxError>(())).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_retrying_cycle_recovers_from_failed_work() {
        let retrying = RetryingExecutingPool::new(pool(2), retryer(3));
        let calls = AtomicUsize::new(0);
        let value = retrying
            .execute(|item| {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient")
                } else {
                    Ok(*item)
                }
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // two resources were invalidated along the way, the third one served
        assert_eq!(value, 2);
        assert_eq!(retrying.pool().metrics().invalidated, 2);
    }

    struct CountingBackoff(Arc<AtomicUsize>);

    impl BackoffPolicy for CountingBackoff {
        fn delay(&self, _attempt: usize) -> Duration {
            Duration::ZERO
        }

        fn backoff(&self, _attempt: usize) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_retrying_empty_pool_consumes_attempts() {
        let backoffs = Arc::new(AtomicUsize::new(0));
        let retryer = Retryer::builder()
            .max_retries(2)
            .backoff(CountingBackoff(Arc::clone(&backoffs)))
            .build();
        let retrying = RetryingExecutingPool::new(pool(1), retryer);
        let held = retrying.pool().borrow().unwrap().unwrap();

        let ran = AtomicUsize::new(0);
        let err = retrying
            .execute(|_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .unwrap_err();
        assert!(matches!(err, PoolError::PoolEmpty));
        // one borrow per attempt, one backoff between each pair
        assert_eq!(retrying.pool().metrics().empty_borrows, 3);
        assert_eq!(backoffs.load(Ordering::SeqCst), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        retrying.pool().return_to_pool(held).unwrap();
        assert_eq!(retrying.execute(|item| Ok::<_, BoxError>(*item)).unwrap(), 0);
    }

    #[test]
    fn test_retrying_gives_up_on_closed_pool() {
        let retrying = RetryingExecutingPool::new(pool(1), retryer(5));
        retrying.pool().stop().unwrap();
        let calls = AtomicUsize::new(0);
        let err = retrying
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .unwrap_err();
        assert!(err.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
