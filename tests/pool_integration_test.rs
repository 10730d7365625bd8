//! ConnectionPool capacity and release guarantees

use futures::FutureExt;
use resilient_cache::{BoxError, ConnectionPool, PoolConfig, PoolError, ResilienceConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stand-in for a client connection
#[derive(Debug)]
struct FakeConnection {
    serial: u32,
    queries: u32,
}

fn pool(max_connections: usize) -> ConnectionPool<FakeConnection> {
    let serial = Arc::new(AtomicU32::new(0));
    ConnectionPool::from_fn(
        PoolConfig {
            max_connections,
            poll_interval: Duration::from_millis(100),
        },
        move || {
            let serial = serial.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, BoxError>(FakeConnection { serial, queries: 0 }) }
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_acquire_beyond_capacity_waits_for_release() {
    let pool = pool(3);
    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(pool.acquire().await.unwrap());
    }
    assert_eq!(pool.stats().in_use, 3);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!waiter.is_finished());

    let released = held.pop().unwrap();
    let released_serial = released.serial;
    pool.release(released);

    let acquired = tokio::time::timeout(Duration::from_millis(250), waiter)
        .await
        .expect("waiter should resolve after release")
        .unwrap()
        .unwrap();
    assert_eq!(acquired.serial, released_serial);
    assert_eq!(pool.stats().created, 3);
}

#[tokio::test]
async fn test_execute_always_releases() {
    let pool = pool(1);

    let failed: Result<(), PoolError> = pool
        .execute(|conn| {
            async move {
                conn.queries += 1;
                Err(PoolError::Creation("query failed".into()))
            }
            .boxed()
        })
        .await;
    assert!(failed.is_err());

    let queries = pool
        .execute(|conn| {
            async move {
                conn.queries += 1;
                Ok::<_, PoolError>(conn.queries)
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(queries, 2);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_releases_when_cancelled() {
    let pool = pool(1);

    let slow = pool.execute(|_conn| {
        async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, PoolError>(())
        }
        .boxed()
    });
    assert!(tokio::time::timeout(Duration::from_millis(10), slow)
        .await
        .is_err());

    assert_eq!(pool.stats().idle, 1);
    assert!(pool.try_acquire().await.unwrap().is_some());
}

#[derive(Debug)]
enum QueryError {
    Pool,
    Rejected,
}

impl From<PoolError> for QueryError {
    fn from(_: PoolError) -> Self {
        QueryError::Pool
    }
}

/// Checks out a connection and bails out before releasing it
async fn run_rejected_query(pool: &ConnectionPool<FakeConnection>) -> Result<(), QueryError> {
    let mut conn = pool.acquire().await?;
    conn.queries += 1;
    Err(QueryError::Rejected)
}

#[tokio::test(start_paused = true)]
async fn test_early_return_does_not_leak_capacity() {
    let config = ResilienceConfig {
        pool_max_connections: 2,
        ..Default::default()
    }
    .pool_config();
    let serial = Arc::new(AtomicU32::new(0));
    let pool = ConnectionPool::from_fn(config, move || {
        let serial = serial.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, BoxError>(FakeConnection { serial, queries: 0 }) }
    });
    assert_eq!(pool.config().max_connections, 2);

    for _ in 0..5 {
        assert!(matches!(
            run_rejected_query(&pool).await,
            Err(QueryError::Rejected)
        ));
    }

    let stats = pool.stats();
    assert_eq!((stats.created, stats.idle, stats.in_use), (1, 1, 0));

    let first = pool.acquire().await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
        .await
        .expect("capacity should still be available")
        .unwrap();
    assert_eq!(first.queries, 5);
    assert_ne!(first.serial, second.serial);
}
