//! Single-resource pool backed by a bounded FIFO of available resources

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::executor::{Executor, ThreadExecutor};
use crate::factory::{ObjectFactory, Validation};
use crate::lifecycle::State;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::pool::{Pool, PoolCore, Resources};

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Pool of interchangeable resources created by an [`ObjectFactory`]
///
/// Borrowing polls the available queue; on a miss it asks the executor to
/// create one more resource (bounded by the max size) and waits for one to
/// show up.
///
/// # Examples
///
/// ```
/// use resilient_pool::{FnFactory, InlineExecutor, Pool, PoolConfiguration, SinglePool};
///
/// let pool = SinglePool::builder(FnFactory::new(|| Ok(vec![0u8; 16])))
///     .config(PoolConfiguration::new().with_max_pool_size(4).with_core_pool_size(2))
///     .executor(InlineExecutor)
///     .build()
///     .unwrap();
///
/// pool.start().unwrap();
/// assert_eq!(pool.size(), 2);
///
/// let buf = pool.borrow().unwrap().unwrap();
/// assert_eq!(buf.len(), 16);
/// pool.return_to_pool(buf).unwrap();
/// pool.stop().unwrap();
/// ```
pub struct SinglePool<T: Send + 'static> {
    inner: Arc<Shared<T>>,
}

struct Shared<T> {
    core: PoolCore,
    available: Mutex<VecDeque<T>>,
    ready: Condvar,
    factory: Arc<dyn ObjectFactory<T>>,
    executor: Arc<dyn Executor>,
    metrics: MetricsTracker,
}

impl<T: Send + 'static> SinglePool<T> {
    pub fn builder<F>(factory: F) -> SinglePoolBuilder<T>
    where
        F: ObjectFactory<T> + 'static,
    {
        SinglePoolBuilder::new(Arc::new(factory))
    }

    pub(crate) fn from_parts(
        config: &PoolConfiguration,
        factory: Arc<dyn ObjectFactory<T>>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let max = config.max_pool_size;
        Self {
            inner: Arc::new(Shared {
                core: PoolCore::new(config.name.clone(), config.core_pool_size(), max),
                available: Mutex::new(VecDeque::with_capacity(max)),
                ready: Condvar::new(),
                factory,
                executor,
                metrics: MetricsTracker::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.core.name
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner
            .metrics
            .snapshot(self.inner.core.active(), self.size())
    }

    /// Async borrow: polls until a resource appears or `timeout` elapses.
    pub async fn borrow_async(&self, timeout: Duration) -> PoolResult<Option<T>> {
        self.inner.core.ensure_running()?;
        if let Some(object) = self.inner.poll() {
            return Ok(Some(object));
        }
        MetricsTracker::incr(&self.inner.metrics.empty_borrows);
        Shared::spawn_create(&self.inner);

        let waited = tokio::time::timeout(timeout, async {
            loop {
                if let Err(e) = self.inner.core.ensure_running() {
                    return Err(e);
                }
                if let Some(object) = self.inner.poll() {
                    return Ok(object);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        match waited {
            Ok(result) => result.map(Some),
            Err(_) => Ok(self.inner.poll()),
        }
    }
}

impl<T> Shared<T>
where
    T: Send + 'static,
{
    fn poll(&self) -> Option<T> {
        let object = self.available.lock().pop_front();
        if object.is_some() {
            MetricsTracker::incr(&self.metrics.borrowed);
        }
        object
    }

    fn is_accepting(&self) -> bool {
        matches!(self.core.state(), State::Starting | State::Running)
    }

    fn destroy(&self, object: T) {
        self.factory.cleanup(object);
        MetricsTracker::incr(&self.metrics.destroyed);
    }

    /// Fire-and-forget creation of one resource, bounded by the max size.
    fn spawn_create(this: &Arc<Self>) {
        if !this.core.try_reserve() {
            return;
        }
        let shared = Arc::clone(this);
        let submitted = this.executor.execute(Box::new(move || {
            let added = if shared.core.state() == State::Running {
                shared.create_and_add()
            } else {
                Ok(false)
            };
            match added {
                Ok(true) => {}
                Ok(false) => shared.core.release(1),
                Err(e) => {
                    shared.core.release(1);
                    MetricsTracker::incr(&shared.metrics.background_failures);
                    warn!(pool = %shared.core.name, error = %e, "background resource creation failed");
                }
            }
        }));
        if let Err(e) = submitted {
            this.core.release(1);
            debug!(pool = %this.core.name, error = %e, "background creation not submitted");
        }
    }

    fn return_object(&self, object: T, error: Option<&BoxError>) -> PoolResult<()> {
        if let Err(e) = self.core.ensure_running() {
            // on loan across a stop; the pool no longer keeps it
            self.destroy(object);
            self.core.release(1);
            return Err(e);
        }

        match self.factory.validate(&object, error) {
            Validation::Valid => {
                let mut available = self.available.lock();
                // every active resource is already idle, so this one was never lent
                if available.len() >= self.core.active() {
                    drop(available);
                    error!(pool = %self.core.name, "rejected a resource the pool has not lent");
                    self.destroy(object);
                    return Err(PoolError::InvariantViolated(
                        "returned resource was not on loan",
                    ));
                }
                available.push_back(object);
                drop(available);
                self.ready.notify_one();
                MetricsTracker::incr(&self.metrics.returned);
                Ok(())
            }
            Validation::Invalid => {
                debug!(pool = %self.core.name, "discarding invalid resource");
                MetricsTracker::incr(&self.metrics.invalidated);
                self.destroy(object);
                self.core.release(1);
                Ok(())
            }
            Validation::ClosePool => {
                warn!(pool = %self.core.name, "factory requested pool shutdown");
                self.destroy(object);
                self.core.release(1);
                self.core.stop(self)
            }
        }
    }
}

impl<T> Resources for Shared<T>
where
    T: Send + 'static,
{
    fn create_and_add(&self) -> PoolResult<bool> {
        let object = self.factory.create().map_err(PoolError::Factory)?;
        MetricsTracker::incr(&self.metrics.created);

        let mut available = self.available.lock();
        if !self.is_accepting() {
            drop(available);
            self.destroy(object);
            return Ok(false);
        }
        if available.len() >= self.core.max_size() {
            drop(available);
            error!(pool = %self.core.name, "available queue rejected a new resource");
            self.destroy(object);
            return Err(PoolError::InvariantViolated(
                "available queue is at capacity on create",
            ));
        }
        available.push_back(object);
        drop(available);
        self.ready.notify_one();
        Ok(true)
    }

    fn remove(&self, count: usize) -> usize {
        let removed: Vec<T> = {
            let mut available = self.available.lock();
            let n = count.min(available.len());
            available.drain(..n).collect()
        };
        let n = removed.len();
        for object in removed {
            self.destroy(object);
        }
        n
    }

    fn clear(&self) -> PoolResult<()> {
        let drained: Vec<T> = self.available.lock().drain(..).collect();
        self.ready.notify_all();
        let n = drained.len();
        for object in drained {
            self.destroy(object);
        }
        self.core.release(n);
        Ok(())
    }
}

impl<T: Send + 'static> Pool for SinglePool<T> {
    type Item = T;

    fn start(&self) -> PoolResult<()> {
        self.inner.core.start(self.inner.as_ref())
    }

    fn stop(&self) -> PoolResult<()> {
        self.inner.core.stop(self.inner.as_ref())
    }

    fn state(&self) -> State {
        self.inner.core.state()
    }

    fn borrow_timeout(&self, timeout: Duration) -> PoolResult<Option<T>> {
        let shared = &self.inner;
        shared.core.ensure_running()?;
        if let Some(object) = shared.poll() {
            return Ok(Some(object));
        }
        MetricsTracker::incr(&shared.metrics.empty_borrows);
        Shared::spawn_create(shared);

        // None when the timeout is too large to represent; wait without one
        let deadline = Instant::now().checked_add(timeout);
        let mut available = shared.available.lock();
        loop {
            if let Err(e) = shared.core.ensure_running() {
                return Err(e);
            }
            if let Some(object) = available.pop_front() {
                MetricsTracker::incr(&shared.metrics.borrowed);
                return Ok(Some(object));
            }
            let Some(deadline) = deadline else {
                shared.ready.wait(&mut available);
                continue;
            };
            if shared.ready.wait_until(&mut available, deadline).timed_out() {
                let object = available.pop_front();
                if object.is_some() {
                    MetricsTracker::incr(&shared.metrics.borrowed);
                }
                return Ok(object);
            }
        }
    }

    fn return_with_error(&self, item: T, error: Option<&BoxError>) -> PoolResult<()> {
        self.inner.return_object(item, error)
    }

    fn expand(&self) -> PoolResult<bool> {
        self.inner.core.ensure_running()?;
        self.inner.core.expand(self.inner.as_ref())
    }

    fn shrink(&self) -> PoolResult<usize> {
        self.inner.core.ensure_running()?;
        Ok(self.inner.core.shrink(self.inner.as_ref()))
    }

    fn size(&self) -> usize {
        self.inner.available.lock().len()
    }

    fn active_count(&self) -> usize {
        self.inner.core.active()
    }

    fn core_pool_size(&self) -> usize {
        self.inner.core.core_size()
    }

    fn max_pool_size(&self) -> usize {
        self.inner.core.max_size()
    }
}

/// Assembles a [`SinglePool`]
pub struct SinglePoolBuilder<T> {
    config: PoolConfiguration,
    factory: Arc<dyn ObjectFactory<T>>,
    executor: Arc<dyn Executor>,
}

impl<T: Send + 'static> SinglePoolBuilder<T> {
    pub fn new(factory: Arc<dyn ObjectFactory<T>>) -> Self {
        Self {
            config: PoolConfiguration::default(),
            factory,
            executor: Arc::new(ThreadExecutor),
        }
    }

    pub fn config(mut self, config: PoolConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn executor<E: Executor + 'static>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn shared_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Build a pool in the `New` state; call [`Pool::start`] before use.
    pub fn build(self) -> PoolResult<SinglePool<T>> {
        self.config.validate()?;
        Ok(SinglePool::from_parts(
            &self.config,
            self.factory,
            self.executor,
        ))
    }
}
