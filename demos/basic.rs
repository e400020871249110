//! Basic usage of pools, retries and the retrying future

use resilient_pool::{
    BalancedKeySupplier, BoxError, ExecutingPool, ExponentialBackoff, FixedBackoff, FnFactory,
    KeyedPool, ObjectFactory, Pool, PoolConfiguration, PoolError, Retryer, RetryingExecutingPool,
    RetryingFuture, RoundRobinLoadBalancer, SinglePool, Validation, WorkerPool,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,resilient_pool=debug"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    println!("=== resilient_pool - Basic Examples ===\n");

    single_pool()?;
    executing_pool()?;
    keyed_pool()?;
    retries()?;
    retrying_future()?;
    Ok(())
}

fn single_pool() -> Result<(), BoxError> {
    println!("1. Single pool:");
    let workers = Arc::new(WorkerPool::new(2, 16));

    let next = Arc::new(AtomicUsize::new(0));
    let factory = FnFactory::new(move || Ok(next.fetch_add(1, Ordering::SeqCst)));
    let pool = SinglePool::builder(factory)
        .config(
            PoolConfiguration::new()
                .with_name("numbers")
                .with_max_pool_size(4)
                .with_core_pool_size(2),
        )
        .shared_executor(workers.clone())
        .build()?;
    pool.start()?;

    {
        let first = pool.lease(Duration::from_millis(100))?.ok_or("pool empty")?;
        println!("   Leased: {}", *first);
        println!("   Available while leased: {}", pool.size());
    }
    println!("   Available after return: {}", pool.size());
    println!("   Metrics: {:?}\n", pool.metrics().export());

    pool.stop()?;
    workers.shutdown(Duration::from_secs(1));
    Ok(())
}

fn executing_pool() -> Result<(), BoxError> {
    println!("2. Executing pool:");
    let factory = FnFactory::new(|| Ok(String::with_capacity(64))).with_validation(|_, error| {
        if error.is_some() {
            Validation::Invalid
        } else {
            Validation::Valid
        }
    });
    let pool = SinglePool::builder(factory)
        .config(PoolConfiguration::new().with_max_pool_size(2))
        .build()?;
    pool.start()?;

    let executing = ExecutingPool::new(pool);
    let written = executing.execute_timeout(Duration::from_millis(100), |buf| {
        buf.clear();
        buf.push_str("hello");
        Ok::<_, BoxError>(buf.len())
    })?;
    println!("   Wrote {:?} bytes", written);

    let failed = executing.execute_timeout(Duration::from_millis(100), |_| {
        Err::<(), _>("socket closed")
    });
    if let Err(e) = failed {
        println!("   Failing work surfaced as: {}", e);
    }

    let retrying = RetryingExecutingPool::new(
        executing.into_inner(),
        Retryer::<PoolError>::builder()
            .max_retries(3)
            .backoff(FixedBackoff::new(Duration::from_millis(10)))
            .name("buffers")
            .build(),
    )
    .with_timeout(Duration::from_millis(100));
    let attempts = AtomicUsize::new(0);
    let value = retrying.execute(|buf| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err("first attempt fails");
        }
        buf.push_str(" again");
        Ok(buf.clone())
    })?;
    println!(
        "   Retried cycle returned {:?} after {} attempts\n",
        value,
        attempts.load(Ordering::SeqCst)
    );
    Ok(())
}

fn keyed_pool() -> Result<(), BoxError> {
    println!("3. Keyed pool:");
    let hosts = vec!["db-a:5432".to_string(), "db-b:5432".to_string()];
    let pool = KeyedPool::builder(
        BalancedKeySupplier::new(hosts, RoundRobinLoadBalancer::new()),
        |host: &String| {
            let host = host.clone();
            Arc::new(FnFactory::new(move || Ok(format!("session@{}", host))))
                as Arc<dyn ObjectFactory<String>>
        },
    )
    .config(
        PoolConfiguration::new()
            .with_name("sessions")
            .with_max_pool_size(2)
            .with_core_pool_size(2)
            .with_key_max_pool_size(2)
            .with_key_core_pool_size(1),
    )
    .build()?;
    pool.start()?;

    for _ in 0..3 {
        if let Some(session) = pool.borrow()? {
            println!("   Borrowed {} from {}", session.value, session.key);
            pool.return_to_pool(session)?;
        }
    }
    println!("   Keys: {:?}, resources: {}\n", pool.keys(), pool.size());
    pool.stop()?;
    Ok(())
}

fn retries() -> Result<(), BoxError> {
    println!("4. Retryer:");
    let retryer = Retryer::<String>::builder()
        .max_retries(5)
        .backoff(ExponentialBackoff::new(Duration::from_millis(2)))
        .retry_on(|e: &String| e.contains("transient"))
        .build();

    let mut calls = 0;
    let result = retryer.submit_with_retry(|| {
        calls += 1;
        if calls < 3 {
            Err(format!("transient failure #{}", calls))
        } else {
            Ok("done")
        }
    });
    println!("   {:?} after {} calls", result, calls);

    let fetch = retryer.decorate(|id: u32| -> Result<String, String> {
        if id == 0 {
            Err("permanent: bad id".to_string())
        } else {
            Ok(format!("record {}", id))
        }
    });
    println!("   decorate(7) = {:?}", fetch.call(7));
    println!("   decorate(0) = {:?}\n", fetch.call(0));
    Ok(())
}

fn retrying_future() -> Result<(), BoxError> {
    println!("5. Retrying future:");
    let runtime = tokio::runtime::Runtime::new()?;
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&polls);

    let ready = RetryingFuture::new(5, move || {
        let poll = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, BoxError>(poll)
        }
    })
    .accept_if(|poll| *poll >= 2);

    match runtime.block_on(ready) {
        Ok(poll) => println!("   Accepted value {} after {} polls", poll, polls.load(Ordering::SeqCst)),
        Err(e) => println!("   Gave up: {}", e),
    }
    Ok(())
}
