//! Pool lifecycle state machine

use crate::errors::{PoolError, PoolResult};
use parking_lot::Mutex;
use std::fmt;

/// Lifecycle state of a pool
///
/// `New -> Starting -> Running -> Stopping -> Terminated`, with `Failed`
/// reachable from `Starting` or `Stopping` when start/stop errors out.
///
/// # Examples
///
/// ```
/// use resilient_pool::State;
///
/// assert!(State::Running.is_running());
/// assert!(State::Terminated.is_closed());
/// assert_eq!(State::New.to_string(), "NEW");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl State {
    pub fn is_running(self) -> bool {
        self == State::Running
    }

    /// Terminal states: the pool will never run again.
    pub fn is_closed(self) -> bool {
        matches!(self, State::Terminated | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::New => "NEW",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Stopping => "STOPPING",
            State::Terminated => "TERMINATED",
            State::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Owned lifecycle value. Only the pool's start/stop path mutates it.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<State>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::New),
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    pub fn ensure_running(&self) -> PoolResult<()> {
        match self.state() {
            State::Running => Ok(()),
            other => Err(PoolError::Closed(other)),
        }
    }

    /// `New -> Starting`
    pub fn begin_start(&self) -> PoolResult<()> {
        self.transition(State::New, State::Starting)
    }

    /// `Starting -> Running` or `Starting -> Failed`
    pub fn finish_start(&self, ok: bool) -> PoolResult<()> {
        let to = if ok { State::Running } else { State::Failed };
        self.transition(State::Starting, to)
    }

    /// `Running -> Stopping`. Returns `Ok(false)` when another caller already
    /// stopped or is stopping the pool.
    pub fn begin_stop(&self) -> PoolResult<bool> {
        let mut state = self.state.lock();
        match *state {
            State::Running => {
                *state = State::Stopping;
                Ok(true)
            }
            State::Stopping | State::Terminated => Ok(false),
            from => Err(PoolError::IllegalTransition {
                from,
                to: State::Stopping,
            }),
        }
    }

    /// `Stopping -> Terminated` or `Stopping -> Failed`
    pub fn finish_stop(&self, ok: bool) -> PoolResult<()> {
        let to = if ok { State::Terminated } else { State::Failed };
        self.transition(State::Stopping, to)
    }

    fn transition(&self, from: State, to: State) -> PoolResult<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(PoolError::IllegalTransition { from: *state, to });
        }
        *state = to;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
