//! Backoff policies consulted between retry attempts

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::Thread;
use std::time::{Duration, Instant};

/// Computes, and optionally sleeps for, the wait before the next attempt.
pub trait BackoffPolicy: Send + Sync {
    /// Wait before retry number `attempt + 1` (`attempt` is 0-based).
    fn delay(&self, attempt: usize) -> Duration;

    /// Suspend the calling thread for the whole [`delay`](Self::delay).
    ///
    /// Only an [`Interrupter`] for the sleeping thread ends the wait early;
    /// the caller then proceeds without error.
    fn backoff(&self, attempt: usize) {
        park_for(self.delay(attempt));
    }
}

impl<B: BackoffPolicy + ?Sized> BackoffPolicy for Arc<B> {
    fn delay(&self, attempt: usize) -> Duration {
        (**self).delay(attempt)
    }

    fn backoff(&self, attempt: usize) {
        (**self).backoff(attempt)
    }
}

thread_local! {
    static INTERRUPT: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

/// Ends a backoff sleep on the thread it was taken from
///
/// # Examples
///
/// ```
/// use resilient_pool::{BackoffPolicy, FixedBackoff, Interrupter};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let (tx, rx) = mpsc::channel();
/// let sleeper = std::thread::spawn(move || {
///     tx.send(Interrupter::current()).unwrap();
///     FixedBackoff::new(Duration::from_secs(60)).backoff(0);
/// });
/// rx.recv().unwrap().interrupt();
/// sleeper.join().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Interrupter {
    flag: Arc<AtomicBool>,
    thread: Thread,
}

impl Interrupter {
    /// Handle for the calling thread.
    pub fn current() -> Self {
        Self {
            flag: INTERRUPT.with(Arc::clone),
            thread: std::thread::current(),
        }
    }

    /// Cut the thread's current (or next) backoff sleep short.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

fn park_for(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    let started = Instant::now();
    let deadline = started.checked_add(delay);
    let interrupted = INTERRUPT.with(|flag| loop {
        if flag.swap(false, Ordering::AcqRel) {
            break true;
        }
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break false;
                }
                std::thread::park_timeout(remaining);
            }
            None => std::thread::park(),
        }
    });
    tracing::trace!(requested = ?delay, slept = ?started.elapsed(), interrupted, "backoff finished");
}

/// Always the same wait.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    wait: Duration,
}

impl FixedBackoff {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, _attempt: usize) -> Duration {
        self.wait
    }
}

/// Uniform random wait in `[0, max)`.
#[derive(Debug, Clone, Copy)]
pub struct RandomBackoff {
    max: Duration,
}

impl RandomBackoff {
    pub fn new(max: Duration) -> Self {
        Self { max }
    }
}

impl BackoffPolicy for RandomBackoff {
    fn delay(&self, _attempt: usize) -> Duration {
        let max_nanos = u64::try_from(self.max.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..max_nanos))
    }
}

// 2^(attempt + 1) stays within u32 for the multiplier
const MAX_EXPONENT: usize = 31;

/// Randomized exponential growth: `base * max(1, random(2^(attempt + 1)))`
///
/// # Examples
///
/// ```
/// use resilient_pool::{BackoffPolicy, ExponentialBackoff};
/// use std::time::Duration;
///
/// let a = ExponentialBackoff::with_seed(Duration::from_millis(10), 7);
/// let b = ExponentialBackoff::with_seed(Duration::from_millis(10), 7);
/// for attempt in 0..5 {
///     let wait = a.delay(attempt);
///     assert_eq!(wait, b.delay(attempt));
///     assert!(wait >= Duration::from_millis(10));
/// }
/// ```
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    rng: Mutex<StdRng>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible sequence for a given seed.
    pub fn with_seed(base: Duration, seed: u64) -> Self {
        Self {
            base,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: usize) -> Duration {
        let bound = 1u64 << (attempt.min(MAX_EXPONENT) + 1);
        let drawn = self.rng.lock().random_range(0..bound);
        let factor = u32::try_from(drawn.max(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}

/// Zero wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

/// Shared instance of [`NoBackoff`].
pub static NO_BACKOFF: NoBackoff = NoBackoff;

impl BackoffPolicy for NoBackoff {
    fn delay(&self, _attempt: usize) -> Duration {
        Duration::ZERO
    }

    fn backoff(&self, _attempt: usize) {}
}
