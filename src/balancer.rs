//! Stateless-ish selection strategies over a candidate list

use parking_lot::Mutex;
use rand::Rng;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks one element out of a candidate list
///
/// An empty list always yields `None`. A returned element is always one of
/// the inputs.
pub trait LoadBalancer<E>: Send + Sync {
    fn get<'a>(&self, items: &'a [E]) -> Option<&'a E>;
}

/// Cycles through the candidates with a monotonically increasing counter.
///
/// # Examples
///
/// ```
/// use resilient_pool::{LoadBalancer, RoundRobinLoadBalancer};
///
/// let lb = RoundRobinLoadBalancer::new();
/// let hosts = ["A", "B", "C", "D"];
/// let picks: Vec<_> = (0..5).map(|_| *lb.get(&hosts).unwrap()).collect();
/// assert_eq!(picks, ["A", "B", "C", "D", "A"]);
/// ```
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    counter: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E> LoadBalancer<E> for RoundRobinLoadBalancer {
    fn get<'a>(&self, items: &'a [E]) -> Option<&'a E> {
        if items.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        items.get(idx % items.len())
    }
}

/// Uniform random pick.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLoadBalancer;

impl<E> LoadBalancer<E> for RandomLoadBalancer {
    fn get<'a>(&self, items: &'a [E]) -> Option<&'a E> {
        if items.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..items.len());
        items.get(idx)
    }
}

type Comparator<E> = Box<dyn Fn(&E, &E) -> CmpOrdering + Send + Sync>;

/// Smallest candidate by a comparator (natural ordering by default).
///
/// # Examples
///
/// ```
/// use resilient_pool::{LoadBalancer, MinLoadBalancer};
///
/// let lb = MinLoadBalancer::natural();
/// let loads = [12, 24, 82, 12, 51, 298, 2, 6982];
/// assert_eq!(lb.get(&loads), Some(&2));
/// ```
pub struct MinLoadBalancer<E> {
    compare: Comparator<E>,
}

impl<E: Ord> MinLoadBalancer<E> {
    pub fn natural() -> Self {
        Self::by(|a: &E, b: &E| a.cmp(b))
    }
}

impl<E> MinLoadBalancer<E> {
    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&E, &E) -> CmpOrdering + Send + Sync + 'static,
    {
        Self {
            compare: Box::new(compare),
        }
    }
}

impl<E> LoadBalancer<E> for MinLoadBalancer<E> {
    fn get<'a>(&self, items: &'a [E]) -> Option<&'a E> {
        items.iter().min_by(|a, b| (self.compare)(a, b))
    }
}

/// Largest candidate by a comparator (natural ordering by default).
pub struct MaxLoadBalancer<E> {
    compare: Comparator<E>,
}

impl<E: Ord> MaxLoadBalancer<E> {
    pub fn natural() -> Self {
        Self::by(|a: &E, b: &E| a.cmp(b))
    }
}

impl<E> MaxLoadBalancer<E> {
    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&E, &E) -> CmpOrdering + Send + Sync + 'static,
    {
        Self {
            compare: Box::new(compare),
        }
    }
}

impl<E> LoadBalancer<E> for MaxLoadBalancer<E> {
    fn get<'a>(&self, items: &'a [E]) -> Option<&'a E> {
        items.iter().max_by(|a, b| (self.compare)(a, b))
    }
}

/// Sticks to one candidate until told it failed, then asks the delegate again.
///
/// # Examples
///
/// ```
/// use resilient_pool::{FailoverLoadBalancer, LoadBalancer, RoundRobinLoadBalancer};
///
/// let lb = FailoverLoadBalancer::new(RoundRobinLoadBalancer::new());
/// let hosts = ["primary", "secondary"];
/// assert_eq!(lb.get(&hosts), Some(&"primary"));
/// assert_eq!(lb.get(&hosts), Some(&"primary"));
///
/// lb.notify_error();
/// assert_eq!(lb.get(&hosts), Some(&"secondary"));
/// ```
pub struct FailoverLoadBalancer<E, L> {
    delegate: L,
    current: Mutex<Option<E>>,
}

impl<E, L> FailoverLoadBalancer<E, L> {
    pub fn new(delegate: L) -> Self {
        Self {
            delegate,
            current: Mutex::new(None),
        }
    }

    /// The current choice failed; the next `get` re-delegates.
    pub fn notify_error(&self) {
        self.current.lock().take();
    }
}

impl<E, L> LoadBalancer<E> for FailoverLoadBalancer<E, L>
where
    E: Clone + PartialEq + Send + Sync,
    L: LoadBalancer<E>,
{
    fn get<'a>(&self, items: &'a [E]) -> Option<&'a E> {
        let mut current = self.current.lock();
        if let Some(sticky) = current.as_ref()
            && let Some(found) = items.iter().find(|item| *item == sticky)
        {
            return Some(found);
        }
        let chosen = self.delegate.get(items);
        *current = chosen.cloned();
        chosen
    }
}
