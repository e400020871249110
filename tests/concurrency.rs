use parking_lot::Mutex;
use resilient_pool::{
    BoxError, FnFactory, KeyedPool, ObjectFactory, Pool, PoolConfiguration, SinglePool,
    WorkerPool,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const THREADS: usize = 8;
const ITERATIONS: usize = 200;

fn counting_pool(core: usize, max: usize, workers: Arc<WorkerPool>) -> SinglePool<usize> {
    let next = Arc::new(AtomicUsize::new(0));
    SinglePool::builder(FnFactory::new(move || Ok(next.fetch_add(1, Ordering::SeqCst))))
        .config(
            PoolConfiguration::new()
                .with_name("concurrency")
                .with_core_pool_size(core)
                .with_max_pool_size(max),
        )
        .shared_executor(workers)
        .build()
        .unwrap()
}

#[test]
fn test_sizing_invariants_hold_under_contention() {
    let workers = Arc::new(WorkerPool::new(2, 64));
    let pool = counting_pool(2, 4, Arc::clone(&workers));
    pool.start().unwrap();

    let on_loan = Mutex::new(HashSet::new());
    let borrowed = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for i in 0..ITERATIONS {
                    let Some(item) = pool.borrow_timeout(Duration::from_millis(20)).unwrap()
                    else {
                        continue;
                    };
                    assert!(on_loan.lock().insert(item), "resource {item} lent twice");
                    borrowed.fetch_add(1, Ordering::Relaxed);

                    let active = pool.active_count();
                    assert!(active <= pool.max_pool_size());
                    assert!(pool.size() <= pool.max_pool_size());

                    if i % 3 == 0 {
                        std::thread::yield_now();
                    }
                    assert!(on_loan.lock().remove(&item));
                    pool.return_to_pool(item).unwrap();
                }
            });
        }
    });

    assert!(borrowed.load(Ordering::Relaxed) > 0);
    assert!(pool.active_count() <= pool.max_pool_size());
    assert!(pool.size() <= pool.active_count());

    pool.stop().unwrap();
    assert_eq!(pool.size(), 0);
    assert!(workers.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_concurrent_expand_never_exceeds_max() {
    let workers = Arc::new(WorkerPool::new(1, 8));
    let pool = counting_pool(0, 5, Arc::clone(&workers));
    pool.start().unwrap();

    let grown = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..10 {
                    if pool.expand().unwrap() {
                        grown.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(grown.load(Ordering::SeqCst), 5);
    assert_eq!(pool.active_count(), 5);
    assert_eq!(pool.size(), 5);

    assert_eq!(pool.shrink().unwrap(), 5);
    assert_eq!(pool.active_count(), 0);
    pool.stop().unwrap();
    workers.shutdown(Duration::from_secs(5));
}

#[test]
fn test_stop_while_borrowers_wait() {
    let workers = Arc::new(WorkerPool::new(1, 8));
    let pool = counting_pool(1, 1, Arc::clone(&workers));
    pool.start().unwrap();
    let held = pool.borrow().unwrap().unwrap();

    std::thread::scope(|scope| {
        let waiters: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| pool.borrow_timeout(Duration::from_secs(30))))
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        pool.stop().unwrap();

        for waiter in waiters {
            let outcome = waiter.join().unwrap();
            assert!(outcome.unwrap_err().is_closed());
        }
    });

    assert!(pool.return_to_pool(held).unwrap_err().is_closed());
    assert_eq!(pool.active_count(), 0);
    workers.shutdown(Duration::from_secs(5));
}

#[test]
fn test_keyed_pool_under_contention() {
    let next_key = AtomicUsize::new(0);
    let pool = KeyedPool::<usize, usize>::builder(
        move || Ok::<_, BoxError>(next_key.fetch_add(1, Ordering::SeqCst) % 3),
        |key: &usize| {
            let key = *key;
            let serial = Arc::new(AtomicUsize::new(0));
            Arc::new(FnFactory::new(move || {
                Ok(key * 1000 + serial.fetch_add(1, Ordering::SeqCst))
            })) as Arc<dyn ObjectFactory<usize>>
        },
    )
    .config(
        PoolConfiguration::new()
            .with_core_pool_size(3)
            .with_max_pool_size(3)
            .with_key_core_pool_size(2)
            .with_key_max_pool_size(2),
    )
    .executor(WorkerPool::new(2, 32))
    .build()
    .unwrap();
    pool.start().unwrap();
    assert_eq!(pool.active_count(), 3);

    let on_loan = Mutex::new(HashSet::new());
    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ITERATIONS {
                    let Some(entry) = pool.borrow().unwrap() else {
                        continue;
                    };
                    assert_eq!(entry.value / 1000, entry.key);
                    assert!(on_loan.lock().insert(entry.value));
                    assert!(on_loan.lock().remove(&entry.value));
                    pool.return_to_pool(entry).unwrap();
                }
            });
        }
    });

    assert_eq!(pool.active_count(), 3);
    assert!(pool.size() <= 6);
    pool.stop().unwrap();
    assert!(pool.is_empty());
}
