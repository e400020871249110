//! # resilient_pool
//!
//! Client-side resiliency building blocks: bounded, validated resource pools
//! and a retry engine, composable so that "borrow a resource, run some work,
//! return or discard it, retry on failure" needs no hand-written state machine.
//!
//! ## Features
//!
//! - Lifecycle-managed pools with core/max sizing, expansion and shrink
//! - Keyed pools (one sub-pool per key, e.g. per endpoint)
//! - Factory-driven validation: keep, discard or close the pool on return
//! - Background resource creation on a pluggable executor
//! - Execute-with-pooled-resource wrappers, optionally retried as a whole
//! - Bounded retry with fixed, random and exponential backoff
//! - A retrying future with value predicates and cancellation
//! - Load-balancing strategies for choosing keys
//!
//! ## Quick Start
//!
//! ```rust
//! use resilient_pool::{
//!     FixedBackoff, FnFactory, InlineExecutor, Pool, PoolConfiguration,
//!     Retryer, RetryingExecutingPool, SinglePool,
//! };
//! use std::time::Duration;
//!
//! let pool = SinglePool::builder(FnFactory::new(|| Ok(String::from("connection"))))
//!     .config(PoolConfiguration::new().with_max_pool_size(4))
//!     .executor(InlineExecutor)
//!     .build()
//!     .unwrap();
//! pool.start().unwrap();
//!
//! let retryer = Retryer::builder()
//!     .max_retries(3)
//!     .backoff(FixedBackoff::new(Duration::from_millis(5)))
//!     .build();
//! let executing = RetryingExecutingPool::new(pool, retryer);
//!
//! let len = executing
//!     .execute(|conn| Ok::<_, std::io::Error>(conn.len()))
//!     .unwrap();
//! assert_eq!(len, 10);
//! ```

mod backoff;
mod balancer;
mod config;
mod errors;
mod executing;
mod executor;
mod factory;
mod keyed;
mod lifecycle;
mod metrics;
mod pool;
mod retry;
mod retrying_future;
mod single;

pub use backoff::{
    BackoffPolicy, ExponentialBackoff, FixedBackoff, Interrupter, NO_BACKOFF, NoBackoff,
    RandomBackoff,
};
pub use balancer::{
    FailoverLoadBalancer, LoadBalancer, MaxLoadBalancer, MinLoadBalancer, RandomLoadBalancer,
    RoundRobinLoadBalancer,
};
pub use config::{DEFAULT_MAX_POOL_SIZE, PoolConfiguration};
pub use errors::{BoxError, PoolError, PoolResult, RetryError, RetryingFutureError};
pub use executing::{ExecutingPool, RetryingExecutingPool};
pub use executor::{Executor, InlineExecutor, Task, ThreadExecutor, TokioExecutor, WorkerPool};
pub use factory::{FnFactory, ObjectFactory, Simple, SimpleObjectFactory, Validation};
pub use keyed::{
    BalancedChooser, BalancedKeySupplier, KeyChooser, KeySupplier, Keyed, KeyedPool,
    KeyedPoolBuilder, RoundRobinChooser,
};
pub use lifecycle::State;
pub use metrics::PoolMetrics;
pub use pool::{Lease, Pool};
pub use retry::{RetryProxy, Retryer, RetryerBuilder, RetryingFn};
pub use retrying_future::{CancelHandle, RetryingFuture};
pub use single::{SinglePool, SinglePoolBuilder};
