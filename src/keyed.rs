//! Pool of per-key sub-pools

use crate::balancer::LoadBalancer;
use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::executor::{Executor, ThreadExecutor};
use crate::factory::ObjectFactory;
use crate::lifecycle::State;
use crate::metrics::PoolMetrics;
use crate::pool::{Pool, PoolCore, Resources};
use crate::single::SinglePool;

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A resource borrowed from a [`KeyedPool`], tagged with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyed<K, T> {
    pub key: K,
    pub value: T,
}

impl<K, T> Keyed<K, T> {
    pub fn new(key: K, value: T) -> Self {
        Self { key, value }
    }

    pub fn into_parts(self) -> (K, T) {
        (self.key, self.value)
    }
}

/// Produces keys for new sub-pools.
pub trait KeySupplier<K>: Send + Sync {
    fn next_key(&self) -> Result<K, BoxError>;
}

impl<K, F> KeySupplier<K> for F
where
    F: Fn() -> Result<K, BoxError> + Send + Sync,
{
    fn next_key(&self) -> Result<K, BoxError> {
        self()
    }
}

/// Supplies keys by running a [`LoadBalancer`] over a fixed candidate list.
pub struct BalancedKeySupplier<K, L> {
    candidates: Vec<K>,
    balancer: L,
}

impl<K, L> BalancedKeySupplier<K, L> {
    pub fn new(candidates: Vec<K>, balancer: L) -> Self {
        Self {
            candidates,
            balancer,
        }
    }
}

impl<K, L> KeySupplier<K> for BalancedKeySupplier<K, L>
where
    K: Clone + Send + Sync,
    L: LoadBalancer<K>,
{
    fn next_key(&self) -> Result<K, BoxError> {
        self.balancer
            .get(&self.candidates)
            .cloned()
            .ok_or_else(|| "no candidate keys available".into())
    }
}

/// Picks a key among the sub-pools that currently have something to lend.
pub trait KeyChooser<K>: Send + Sync {
    fn choose(&self, candidates: &[K]) -> Option<K>;
}

/// Default chooser: counter modulo the candidate count.
#[derive(Debug, Default)]
pub struct RoundRobinChooser {
    counter: AtomicUsize,
}

impl RoundRobinChooser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Clone> KeyChooser<K> for RoundRobinChooser {
    fn choose(&self, candidates: &[K]) -> Option<K> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        candidates.get(idx % candidates.len()).cloned()
    }
}

/// Chooser backed by any [`LoadBalancer`].
pub struct BalancedChooser<L>(pub L);

impl<K, L> KeyChooser<K> for BalancedChooser<L>
where
    K: Clone,
    L: LoadBalancer<K>,
{
    fn choose(&self, candidates: &[K]) -> Option<K> {
        self.0.get(candidates).cloned()
    }
}

type FactoryFor<K, T> = dyn Fn(&K) -> Arc<dyn ObjectFactory<T>> + Send + Sync;

/// Resources partitioned by key, one [`SinglePool`] per key
///
/// The outer core/max sizes bound the number of keys; each sub-pool has
/// its own per-key core/max sizes. Sub-pools are only created by `expand`
/// (and `start`), never by a borrow.
///
/// # Examples
///
/// ```
/// use resilient_pool::{
///     BoxError, FnFactory, InlineExecutor, KeyedPool, ObjectFactory, Pool, PoolConfiguration,
/// };
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let next = AtomicUsize::new(0);
/// let pool = KeyedPool::<String, String>::builder(
///     move || Ok::<_, BoxError>(format!("host-{}", next.fetch_add(1, Ordering::SeqCst))),
///     |host: &String| {
///         let host = host.clone();
///         Arc::new(FnFactory::new(move || Ok(format!("conn to {}", host))))
///             as Arc<dyn ObjectFactory<String>>
///     },
/// )
/// .config(
///     PoolConfiguration::new()
///         .with_max_pool_size(2)
///         .with_core_pool_size(2)
///         .with_key_max_pool_size(1)
///         .with_key_core_pool_size(1),
/// )
/// .executor(InlineExecutor)
/// .build()
/// .unwrap();
///
/// pool.start().unwrap();
/// assert_eq!(pool.active_count(), 2);
///
/// let conn = pool.borrow_key(&"host-1".to_string(), Default::default()).unwrap().unwrap();
/// assert_eq!(conn.value, "conn to host-1");
/// pool.return_to_pool(conn).unwrap();
/// ```
pub struct KeyedPool<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    core: PoolCore,
    config: PoolConfiguration,
    pools: DashMap<K, Arc<SinglePool<T>>>,
    key_supplier: Arc<dyn KeySupplier<K>>,
    factory_for: Arc<FactoryFor<K, T>>,
    chooser: Arc<dyn KeyChooser<K>>,
    executor: Arc<dyn Executor>,
}

impl<K, T> KeyedPool<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn builder<S, F>(key_supplier: S, factory_for: F) -> KeyedPoolBuilder<K, T>
    where
        S: KeySupplier<K> + 'static,
        F: Fn(&K) -> Arc<dyn ObjectFactory<T>> + Send + Sync + 'static,
    {
        KeyedPoolBuilder::new(Arc::new(key_supplier), Arc::new(factory_for))
    }

    /// Borrow from the sub-pool for `key`. Absent keys yield `None`.
    pub fn borrow_key(&self, key: &K, timeout: Duration) -> PoolResult<Option<Keyed<K, T>>> {
        self.core.ensure_running()?;
        let Some(pool) = self.sub_pool(key) else {
            return Ok(None);
        };
        Ok(pool
            .borrow_timeout(timeout)?
            .map(|value| Keyed::new(key.clone(), value)))
    }

    /// Keys currently present.
    pub fn keys(&self) -> Vec<K> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.pools.contains_key(key)
    }

    pub fn sub_pool(&self, key: &K) -> Option<Arc<SinglePool<T>>> {
        self.pools.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Total resources owned across sub-pools.
    pub fn resource_count(&self) -> usize {
        self.snapshot().iter().map(|(_, pool)| pool.active_count()).sum()
    }

    /// Counters summed over every sub-pool.
    pub fn metrics(&self) -> PoolMetrics {
        self.snapshot()
            .iter()
            .fold(PoolMetrics::default(), |total, (_, pool)| {
                total.merge(&pool.metrics())
            })
    }

    fn snapshot(&self) -> Vec<(K, Arc<SinglePool<T>>)> {
        self.pools
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn non_empty_keys(&self) -> Vec<K> {
        self.snapshot()
            .into_iter()
            .filter(|(_, pool)| !pool.is_empty())
            .map(|(key, _)| key)
            .collect()
    }

    fn build_sub_pool(&self, key: &K) -> SinglePool<T> {
        let config = self.config.for_key(&format!("{:?}", key));
        SinglePool::from_parts(
            &config,
            (self.factory_for)(key),
            Arc::clone(&self.executor),
        )
    }

    /// Drop a sub-pool that closed itself, unless it was already replaced.
    fn evict(&self, key: &K, pool: &Arc<SinglePool<T>>) {
        if self
            .pools
            .remove_if(key, |_, current| Arc::ptr_eq(current, pool))
            .is_some()
        {
            self.core.release(1);
            debug!(pool = %self.core.name, key = ?key, "evicted closed sub-pool");
        }
    }

    fn stop_sub_pool(key: &K, pool: &SinglePool<T>) {
        if let Err(e) = pool.stop() {
            warn!(key = ?key, error = %e, "failed to stop sub-pool");
        }
    }
}

impl<K, T> Resources for KeyedPool<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    fn create_and_add(&self) -> PoolResult<bool> {
        let key = self
            .key_supplier
            .next_key()
            .map_err(PoolError::KeySupplier)?;
        if self.pools.contains_key(&key) {
            debug!(pool = %self.core.name, key = ?key, "key already pooled");
            return Ok(false);
        }

        let pool = Arc::new(self.build_sub_pool(&key));
        pool.start()?;
        match self.pools.insert(key.clone(), pool) {
            None => Ok(true),
            Some(replaced) => {
                // lost a race for the same key
                Self::stop_sub_pool(&key, &replaced);
                Ok(false)
            }
        }
    }

    fn remove(&self, count: usize) -> usize {
        let victims: Vec<K> = self.keys().into_iter().take(count).collect();
        let mut removed = 0;
        for key in victims {
            if let Some((key, pool)) = self.pools.remove(&key) {
                Self::stop_sub_pool(&key, &pool);
                removed += 1;
            }
        }
        removed
    }

    fn clear(&self) -> PoolResult<()> {
        let pools = self.snapshot();
        std::thread::scope(|scope| {
            for (key, pool) in &pools {
                scope.spawn(move || Self::stop_sub_pool(key, pool));
            }
        });
        self.pools.clear();
        self.core.release(pools.len());
        Ok(())
    }
}

impl<K, T> Pool for KeyedPool<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    type Item = Keyed<K, T>;

    fn start(&self) -> PoolResult<()> {
        self.core.start(self)
    }

    fn stop(&self) -> PoolResult<()> {
        self.core.stop(self)
    }

    fn state(&self) -> State {
        self.core.state()
    }

    /// Borrow from a chooser-selected non-empty sub-pool. When no sub-pool
    /// has anything available this returns `None` at once, without waiting
    /// for `timeout`.
    fn borrow_timeout(&self, timeout: Duration) -> PoolResult<Option<Keyed<K, T>>> {
        self.core.ensure_running()?;
        match self.chooser.choose(&self.non_empty_keys()) {
            Some(key) => self.borrow_key(&key, timeout),
            None => Ok(None),
        }
    }

    fn return_with_error(&self, item: Keyed<K, T>, error: Option<&BoxError>) -> PoolResult<()> {
        let (key, value) = item.into_parts();
        if let Err(e) = self.core.ensure_running() {
            // its sub-pool went away with the stop
            debug!(
                pool = %self.core.name,
                key = ?key,
                "cleaning up resource returned after stop"
            );
            (self.factory_for)(&key).cleanup(value);
            return Err(e);
        }
        match self.sub_pool(&key) {
            Some(pool) => {
                let result = pool.return_with_error(value, error);
                if pool.state().is_closed() {
                    self.evict(&key, &pool);
                }
                result
            }
            None => {
                warn!(pool = %self.core.name, key = ?key, "returned resource for an unknown key");
                (self.factory_for)(&key).cleanup(value);
                Err(PoolError::IllegalArgument(format!(
                    "no sub-pool for key {:?}",
                    key
                )))
            }
        }
    }

    fn expand(&self) -> PoolResult<bool> {
        self.core.ensure_running()?;
        self.core.expand(self)
    }

    fn shrink(&self) -> PoolResult<usize> {
        self.core.ensure_running()?;
        Ok(self.core.shrink(self))
    }

    /// Resources available across every sub-pool.
    fn size(&self) -> usize {
        self.snapshot().iter().map(|(_, pool)| pool.size()).sum()
    }

    /// Number of keys.
    fn active_count(&self) -> usize {
        self.core.active()
    }

    fn core_pool_size(&self) -> usize {
        self.core.core_size()
    }

    fn max_pool_size(&self) -> usize {
        self.core.max_size()
    }

    /// True when every sub-pool is empty.
    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// Assembles a [`KeyedPool`]
pub struct KeyedPoolBuilder<K, T> {
    config: PoolConfiguration,
    key_supplier: Arc<dyn KeySupplier<K>>,
    factory_for: Arc<FactoryFor<K, T>>,
    chooser: Arc<dyn KeyChooser<K>>,
    executor: Arc<dyn Executor>,
}

impl<K, T> KeyedPoolBuilder<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new(key_supplier: Arc<dyn KeySupplier<K>>, factory_for: Arc<FactoryFor<K, T>>) -> Self {
        Self {
            config: PoolConfiguration::default(),
            key_supplier,
            factory_for,
            chooser: Arc::new(RoundRobinChooser::new()),
            executor: Arc::new(ThreadExecutor),
        }
    }

    pub fn config(mut self, config: PoolConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn chooser<C: KeyChooser<K> + 'static>(mut self, chooser: C) -> Self {
        self.chooser = Arc::new(chooser);
        self
    }

    /// Executor shared by every sub-pool for background creation.
    pub fn executor<E: Executor + 'static>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn shared_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn build(self) -> PoolResult<KeyedPool<K, T>> {
        self.config.validate()?;
        Ok(KeyedPool {
            core: PoolCore::new(
                self.config.name.clone(),
                self.config.core_pool_size(),
                self.config.max_pool_size,
            ),
            config: self.config,
            pools: DashMap::new(),
            key_supplier: self.key_supplier,
            factory_for: self.factory_for,
            chooser: self.chooser,
            executor: self.executor,
        })
    }
}
