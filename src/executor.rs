//! Executors for opportunistic background resource creation

use crate::errors::{PoolError, PoolResult};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs background tasks submitted by a pool.
pub trait Executor: Send + Sync {
    /// Submit a task. Rejected tasks are dropped without running.
    fn execute(&self, task: Task) -> PoolResult<()>;
}

impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    fn execute(&self, task: Task) -> PoolResult<()> {
        (**self).execute(task)
    }
}

/// Runs every task on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) -> PoolResult<()> {
        task();
        Ok(())
    }
}

/// Spawns a detached thread per task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) -> PoolResult<()> {
        thread::Builder::new()
            .name("pool-background".to_string())
            .spawn(task)
            .map(|_| ())
            .map_err(|e| {
                warn!(error = %e, "failed to spawn background thread");
                PoolError::ExecutorRejected
            })
    }
}

/// Runs tasks on tokio's blocking thread pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling context.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> PoolResult<()> {
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}

/// Fixed set of worker threads fed through a bounded queue
///
/// Submissions beyond `queue_capacity` pending tasks are rejected rather
/// than blocking the submitter.
///
/// # Examples
///
/// ```
/// use resilient_pool::{Executor, WorkerPool};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let workers = WorkerPool::new(2, 16);
/// let (tx, rx) = mpsc::channel();
/// workers.execute(Box::new(move || tx.send(42).unwrap())).unwrap();
/// assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
/// assert!(workers.shutdown(Duration::from_secs(1)));
/// ```
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    done: Receiver<()>,
}

impl WorkerPool {
    pub fn new(threads: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded::<Task>(queue_capacity.max(1));
        let (done_tx, done) = channel::unbounded();

        let workers = (0..threads.max(1))
            .filter_map(|idx| {
                let receiver = receiver.clone();
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("pool-worker-{}", idx))
                    .spawn(move || {
                        for task in receiver.iter() {
                            task();
                        }
                        let _ = done_tx.send(());
                    })
                    .map_err(|e| warn!(error = %e, "failed to spawn pool worker"))
                    .ok()
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            done,
        }
    }

    /// Stop accepting tasks and wait up to `grace` for queued and in-flight
    /// tasks to finish. Returns `true` when every worker exited in time;
    /// stragglers are left detached.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.sender.lock().take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let deadline = Instant::now().checked_add(grace);
        let mut exited = 0;
        while exited < workers.len() {
            let received = match deadline {
                Some(deadline) => self
                    .done
                    .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                    .is_ok(),
                None => self.done.recv().is_ok(),
            };
            if !received {
                break;
            }
            exited += 1;
        }

        if exited < workers.len() {
            warn!(
                stragglers = workers.len() - exited,
                "worker pool shutdown grace period elapsed"
            );
            return false;
        }
        for worker in workers {
            let _ = worker.join();
        }
        debug!("worker pool shut down");
        true
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) -> PoolResult<()> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(PoolError::ExecutorRejected);
        };
        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(PoolError::ExecutorRejected)
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.lock().take();
    }
}
