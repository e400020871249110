//! Pool entry points, the shared sizing skeleton and leases

use crate::errors::{BoxError, PoolResult};
use crate::lifecycle::{Lifecycle, State};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, info};

/// Public surface shared by [`SinglePool`](crate::SinglePool) and
/// [`KeyedPool`](crate::KeyedPool).
///
/// Every operation other than `start`, `stop` and the size accessors fails
/// with [`PoolError::Closed`](crate::PoolError::Closed) unless the pool is
/// running.
pub trait Pool: Send + Sync {
    type Item: Send;

    /// `New -> Starting -> Running`, expanding to the core size on the way.
    fn start(&self) -> PoolResult<()>;

    /// `Running -> Stopping -> Terminated`, releasing every available resource.
    fn stop(&self) -> PoolResult<()>;

    fn state(&self) -> State;

    /// Non-blocking borrow.
    fn borrow(&self) -> PoolResult<Option<Self::Item>> {
        self.borrow_timeout(Duration::ZERO)
    }

    /// Borrow, waiting up to `timeout` for a resource to become available.
    fn borrow_timeout(&self, timeout: Duration) -> PoolResult<Option<Self::Item>>;

    fn return_to_pool(&self, item: Self::Item) -> PoolResult<()> {
        self.return_with_error(item, None)
    }

    /// Return a resource together with the error observed while it was on
    /// loan; the factory's validation decides its fate.
    fn return_with_error(&self, item: Self::Item, error: Option<&BoxError>) -> PoolResult<()>;

    /// Add one resource if below the max size. Returns whether one was added.
    fn expand(&self) -> PoolResult<bool>;

    /// Remove resources above the core size. Returns how many were removed.
    fn shrink(&self) -> PoolResult<usize>;

    /// Resources available to borrow right now.
    fn size(&self) -> usize;

    /// Resources owned by the pool, available or on loan.
    fn active_count(&self) -> usize;

    fn core_pool_size(&self) -> usize;

    fn max_pool_size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Every active resource is currently available.
    fn is_full(&self) -> bool {
        self.size() >= self.active_count()
    }

    /// Borrow wrapped in a guard that returns the item on drop.
    fn lease(&self, timeout: Duration) -> PoolResult<Option<Lease<'_, Self>>>
    where
        Self: Sized,
    {
        Ok(self
            .borrow_timeout(timeout)?
            .map(|item| Lease::new(self, item)))
    }
}

/// A borrowed item that goes back to its pool when dropped
///
/// # Examples
///
/// ```
/// use resilient_pool::{FnFactory, InlineExecutor, Pool, PoolConfiguration, SinglePool};
/// use std::time::Duration;
///
/// let pool = SinglePool::builder(FnFactory::new(|| Ok(String::from("conn"))))
///     .config(PoolConfiguration::new().with_max_pool_size(1).with_core_pool_size(1))
///     .executor(InlineExecutor)
///     .build()
///     .unwrap();
/// pool.start().unwrap();
///
/// {
///     let conn = pool.lease(Duration::ZERO).unwrap().unwrap();
///     assert_eq!(conn.as_str(), "conn");
///     assert!(pool.is_empty());
/// }
/// assert_eq!(pool.size(), 1);
/// ```
pub struct Lease<'a, P: Pool> {
    pool: &'a P,
    item: Option<P::Item>,
}

impl<'a, P: Pool> Lease<'a, P> {
    fn new(pool: &'a P, item: P::Item) -> Self {
        Self {
            pool,
            item: Some(item),
        }
    }

    /// Return the item along with the error seen while using it.
    pub fn fail(mut self, error: &BoxError) -> PoolResult<()> {
        match self.item.take() {
            Some(item) => self.pool.return_with_error(item, Some(error)),
            None => Ok(()),
        }
    }

    /// Return the item now, surfacing any error instead of logging it.
    pub fn release(mut self) -> PoolResult<()> {
        match self.item.take() {
            Some(item) => self.pool.return_to_pool(item),
            None => Ok(()),
        }
    }

    /// Take the item out; it is no longer returned automatically.
    pub fn detach(mut self) -> Option<P::Item> {
        self.item.take()
    }
}

impl<P: Pool> Deref for Lease<'_, P> {
    type Target = P::Item;

    fn deref(&self) -> &Self::Target {
        match self.item.as_ref() {
            Some(item) => item,
            None => unreachable!("lease item is only taken by consuming methods"),
        }
    }
}

impl<P: Pool> DerefMut for Lease<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.item.as_mut() {
            Some(item) => item,
            None => unreachable!("lease item is only taken by consuming methods"),
        }
    }
}

impl<P: Pool> Drop for Lease<'_, P> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            if let Err(e) = self.pool.return_to_pool(item) {
                tracing::debug!(error = %e, "lease returned to a closed pool");
            }
        }
    }
}

/// Resource hooks a concrete pool supplies to the sizing skeleton.
pub(crate) trait Resources {
    /// Create one resource into an already reserved slot. `Ok(false)` means
    /// nothing was added and the slot is released.
    fn create_and_add(&self) -> PoolResult<bool>;

    /// Remove up to `count` resources; returns how many were removed.
    fn remove(&self, count: usize) -> usize;

    /// Release every owned resource that is not on loan.
    fn clear(&self) -> PoolResult<()>;
}

/// Lifecycle and core/max sizing shared by every pool.
#[derive(Debug)]
pub(crate) struct PoolCore {
    pub name: String,
    lifecycle: Lifecycle,
    core_size: usize,
    max_size: usize,
    active: AtomicUsize,
}

impl PoolCore {
    pub fn new(name: String, core_size: usize, max_size: usize) -> Self {
        Self {
            name,
            lifecycle: Lifecycle::new(),
            core_size,
            max_size,
            active: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    pub fn ensure_running(&self) -> PoolResult<()> {
        self.lifecycle.ensure_running()
    }

    pub fn core_size(&self) -> usize {
        self.core_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Claim one slot below the max size.
    pub fn try_reserve(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_size).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(count))
            });
    }

    pub fn start<R: Resources>(&self, resources: &R) -> PoolResult<()> {
        self.lifecycle.begin_start()?;

        let mut filled = Ok(());
        while self.active() < self.core_size {
            match self.expand(resources) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    filled = Err(e);
                    break;
                }
            }
        }

        match filled {
            Ok(()) => {
                self.lifecycle.finish_start(true)?;
                info!(pool = %self.name, active = self.active(), "pool started");
                Ok(())
            }
            Err(e) => {
                error!(pool = %self.name, error = %e, "pool failed to start");
                // release whatever was created before the failure
                let _ = resources.clear();
                self.lifecycle.finish_start(false)?;
                Err(e)
            }
        }
    }

    pub fn stop<R: Resources>(&self, resources: &R) -> PoolResult<()> {
        if !self.lifecycle.begin_stop()? {
            return Ok(());
        }
        match resources.clear() {
            Ok(()) => {
                self.lifecycle.finish_stop(true)?;
                info!(pool = %self.name, "pool stopped");
                Ok(())
            }
            Err(e) => {
                error!(pool = %self.name, error = %e, "pool failed to stop");
                self.lifecycle.finish_stop(false)?;
                Err(e)
            }
        }
    }

    pub fn expand<R: Resources>(&self, resources: &R) -> PoolResult<bool> {
        if !self.try_reserve() {
            return Ok(false);
        }
        match resources.create_and_add() {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.release(1);
                Ok(false)
            }
            Err(e) => {
                self.release(1);
                Err(e)
            }
        }
    }

    pub fn shrink<R: Resources>(&self, resources: &R) -> usize {
        let excess = self.active().saturating_sub(self.core_size);
        if excess == 0 {
            return 0;
        }
        let removed = resources.remove(excess);
        self.release(removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PoolError;
    use parking_lot::Mutex;

    struct Counter {
        items: Mutex<usize>,
        fail_after: Option<usize>,
    }

    impl Counter {
        fn new(fail_after: Option<usize>) -> Self {
            Self {
                items: Mutex::new(0),
                fail_after,
            }
        }
    }

    impl Resources for Counter {
        fn create_and_add(&self) -> PoolResult<bool> {
            let mut items = self.items.lock();
            if Some(*items) == self.fail_after {
                return Err(PoolError::Factory("exhausted".into()));
            }
            *items += 1;
            Ok(true)
        }

        fn remove(&self, count: usize) -> usize {
            let mut items = self.items.lock();
            let removed = count.min(*items);
            *items -= removed;
            removed
        }

        fn clear(&self) -> PoolResult<()> {
            *self.items.lock() = 0;
            Ok(())
        }
    }

    #[test]
    fn test_start_fills_to_core() {
        let core = PoolCore::new("t".into(), 3, 5);
        let resources = Counter::new(None);
        core.start(&resources).unwrap();
        assert_eq!(core.state(), State::Running);
        assert_eq!(core.active(), 3);
        assert_eq!(*resources.items.lock(), 3);
    }

    #[test]
    fn test_start_failure_marks_failed() {
        let core = PoolCore::new("t".into(), 3, 5);
        let resources = Counter::new(Some(1));
        assert!(core.start(&resources).is_err());
        assert_eq!(core.state(), State::Failed);
        assert_eq!(core.active(), 1);
    }

    #[test]
    fn test_expand_and_shrink_respect_bounds() {
        let core = PoolCore::new("t".into(), 1, 2);
        let resources = Counter::new(None);
        core.start(&resources).unwrap();

        assert!(core.expand(&resources).unwrap());
        assert!(!core.expand(&resources).unwrap());
        assert_eq!(core.active(), 2);

        assert_eq!(core.shrink(&resources), 1);
        assert_eq!(core.shrink(&resources), 0);
        assert_eq!(core.active(), 1);
    }

    #[test]
    fn test_stop_twice() {
        let core = PoolCore::new("t".into(), 1, 1);
        let resources = Counter::new(None);
        core.start(&resources).unwrap();
        core.stop(&resources).unwrap();
        core.stop(&resources).unwrap();
        assert_eq!(core.state(), State::Terminated);
    }

    #[test]
    fn test_reserve_never_exceeds_max() {
        let core = PoolCore::new("t".into(), 0, 2);
        assert!(core.try_reserve());
        assert!(core.try_reserve());
        assert!(!core.try_reserve());
        core.release(5);
        assert_eq!(core.active(), 0);
    }
}
