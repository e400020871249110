//! Error types for pools and retries

use crate::lifecycle::State;
use thiserror::Error;

/// Boxed error used for factory, key supplier and unit-of-work failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool is closed (state: {0})")]
    Closed(State),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal lifecycle transition from {from} to {to}")]
    IllegalTransition { from: State, to: State },

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to create pooled object: {0}")]
    Factory(#[source] BoxError),

    #[error("Failed to obtain a pool key: {0}")]
    KeySupplier(#[source] BoxError),

    #[error("Pooled work failed: {0}")]
    Work(#[source] BoxError),

    #[error("Pool is empty - no objects available")]
    PoolEmpty,

    #[error("Executor rejected the background task")]
    ExecutorRejected,

    #[error("Pool invariant violated: {0}")]
    InvariantViolated(&'static str),
}

impl PoolError {
    /// Whether this is the closed-pool failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Failure of a runnable submitted through a [`Retryer`](crate::Retryer).
#[derive(Error, Debug)]
#[error("Retried task failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E> {
    pub attempts: usize,
    #[source]
    pub source: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Terminal failure of a [`RetryingFuture`](crate::RetryingFuture).
#[derive(Error, Debug)]
pub enum RetryingFutureError<T, E> {
    /// Every attempt produced a value the predicate rejected. Carries the last one.
    #[error("Value rejected by predicate after {attempts} attempt(s)")]
    Rejected { value: T, attempts: usize },

    #[error("Retried future failed after {attempts} attempt(s): {source}")]
    Failed {
        #[source]
        source: E,
        attempts: usize,
    },

    #[error("Retrying future was cancelled")]
    Cancelled,
}

impl<T, E> RetryingFutureError<T, E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryingFutureError::Cancelled)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, RetryingFutureError::Rejected { .. })
    }
}
