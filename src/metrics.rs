//! Informational pool counters

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time counters for a pool
///
/// # Examples
///
/// ```
/// use resilient_pool::{FnFactory, InlineExecutor, Pool, PoolConfiguration, SinglePool};
///
/// let pool = SinglePool::builder(FnFactory::new(|| Ok(1u32)))
///     .config(PoolConfiguration::new().with_max_pool_size(2).with_core_pool_size(1))
///     .executor(InlineExecutor)
///     .build()
///     .unwrap();
/// pool.start().unwrap();
///
/// let value = pool.borrow().unwrap().unwrap();
/// pool.return_to_pool(value).unwrap();
///
/// let metrics = pool.metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.borrowed, 1);
/// assert_eq!(metrics.returned, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Resources created by the factory
    pub created: usize,

    /// Resources handed to the factory's cleanup hook
    pub destroyed: usize,

    /// Successful borrows
    pub borrowed: usize,

    /// Returns that put a resource back into the available set
    pub returned: usize,

    /// Returns that the factory judged invalid
    pub invalidated: usize,

    /// Borrows that found nothing available on the first poll
    pub empty_borrows: usize,

    /// Opportunistic background creations that failed
    pub background_failures: usize,

    /// Resources currently owned by the pool
    pub active: usize,

    /// Resources available to borrow right now
    pub available: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("borrowed".to_string(), self.borrowed.to_string());
        metrics.insert("returned".to_string(), self.returned.to_string());
        metrics.insert("invalidated".to_string(), self.invalidated.to_string());
        metrics.insert("empty_borrows".to_string(), self.empty_borrows.to_string());
        metrics.insert(
            "background_failures".to_string(),
            self.background_failures.to_string(),
        );
        metrics.insert("active".to_string(), self.active.to_string());
        metrics.insert("available".to_string(), self.available.to_string());
        metrics
    }

    /// Sum two snapshots (used to aggregate keyed sub-pools).
    pub fn merge(mut self, other: &PoolMetrics) -> PoolMetrics {
        self.created += other.created;
        self.destroyed += other.destroyed;
        self.borrowed += other.borrowed;
        self.returned += other.returned;
        self.invalidated += other.invalidated;
        self.empty_borrows += other.empty_borrows;
        self.background_failures += other.background_failures;
        self.active += other.active;
        self.available += other.available;
        self
    }
}

/// Internal counters
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub borrowed: AtomicUsize,
    pub returned: AtomicUsize,
    pub invalidated: AtomicUsize,
    pub empty_borrows: AtomicUsize,
    pub background_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active: usize, available: usize) -> PoolMetrics {
        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            borrowed: self.borrowed.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            empty_borrows: self.empty_borrows.load(Ordering::Relaxed),
            background_failures: self.background_failures.load(Ordering::Relaxed),
            active,
            available,
        }
    }
}
