//! Borrow/return integration tests against the mock driver.
//!
//! Covers wait-strategy ordering, bounded waits, connection reuse, idle
//! eviction with replenish, broken connection handling and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use beecp_pool::{ConnectionPool, PoolConfig, PoolError};
use parking_lot::Mutex;
use beecp_testing::{MOCK_DRIVER_NAME, MOCK_URL, MockState, mock_registry};

fn config() -> PoolConfig {
    PoolConfig::new(MOCK_DRIVER_NAME, MOCK_URL, "sa", "secret")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start(config: PoolConfig) -> (Arc<ConnectionPool>, Arc<MockState>) {
    init_tracing();
    let (registry, state) = mock_registry();
    let pool = ConnectionPool::initialize(config, &registry).unwrap();
    (Arc::new(pool), state)
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// =============================================================================
// Wait strategies
// =============================================================================

#[test]
fn test_fair_mode_serves_first_waiter_first() {
    let (pool, _) = start(
        config()
            .pool_max_size(2)
            .fair_mode(true)
            .borrower_max_wait_time(Duration::from_secs(5)),
    );
    let first = pool.borrow().unwrap();
    let _second = pool.borrow().unwrap();

    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::new();
    for name in ["B1", "B2", "B3"] {
        let tx = tx.clone();
        handles.push(thread::spawn({
            let pool = Arc::clone(&pool);
            move || {
                let conn = pool.borrow();
                tx.send((name, conn.is_ok())).unwrap();
                // hold until the test is done so nobody else is served
                thread::sleep(Duration::from_millis(300));
                drop(conn);
            }
        }));
        // arrival order
        assert!(wait_for(
            || pool.status().waiting == handles.len(),
            Duration::from_secs(2)
        ));
    }

    first.close().unwrap();
    let (winner, ok) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(ok);
    assert_eq!(winner, "B1");
    assert_eq!(pool.metrics().handoffs, 1);

    pool.shutdown();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_unfair_mode_serves_or_times_out_every_waiter() {
    let wait = Duration::from_millis(400);
    let (pool, _) = start(config().pool_max_size(2).borrower_max_wait_time(wait));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            let started = Instant::now();
            let result = pool.borrow();
            let waited = started.elapsed();
            if let Ok(conn) = &result {
                thread::sleep(Duration::from_millis(20));
                conn.close().unwrap();
            }
            (result.map(|_| ()), waited)
        }));
    }

    let mut served = 0;
    for handle in handles {
        let (result, waited) = handle.join().unwrap();
        match result {
            Ok(()) => served += 1,
            Err(e) => {
                assert!(e.is_timeout(), "unexpected error: {e}");
                assert!(waited >= wait);
            }
        }
        assert!(waited < wait + Duration::from_secs(1));
    }
    assert!(served >= 2);

    let status = pool.status();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.in_use, 0);
    assert!(status.total <= 2);
}

#[test]
fn test_fair_mode_newcomers_cannot_overtake_queue() {
    let (pool, _) = start(
        config()
            .pool_max_size(1)
            .fair_mode(true)
            .borrower_max_wait_time(Duration::from_secs(10)),
    );
    let held = pool.borrow().unwrap();
    let served = Arc::new(Mutex::new(Vec::new()));

    let mut queued = Vec::new();
    for name in ["W1", "W2", "W3", "W4"] {
        let served = Arc::clone(&served);
        queued.push(thread::spawn({
            let pool = Arc::clone(&pool);
            move || {
                let conn = pool.borrow().unwrap();
                served.lock().push(name);
                thread::sleep(Duration::from_millis(20));
                conn.close().unwrap();
            }
        }));
        assert!(wait_for(
            || pool.status().waiting == queued.len(),
            Duration::from_secs(2)
        ));
    }

    // fresh arrivals keep hitting the pool while the queue drains
    let stop = Arc::new(AtomicBool::new(false));
    let newcomers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let served = Arc::clone(&served);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let conn = thread::spawn({
                        let pool = Arc::clone(&pool);
                        move || pool.borrow()
                    })
                    .join()
                    .unwrap();
                    if let Ok(conn) = conn {
                        served.lock().push("new");
                        conn.close().unwrap();
                    }
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(30));

    held.close().unwrap();
    for handle in queued {
        handle.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    pool.shutdown();
    for handle in newcomers {
        handle.join().unwrap();
    }

    let served = served.lock();
    assert_eq!(served[..4], ["W1", "W2", "W3", "W4"]);
}

// =============================================================================
// Timeouts
// =============================================================================

#[test]
fn test_borrow_times_out_without_leaking() {
    let (pool, state) = start(
        config()
            .pool_max_size(1)
            .borrower_max_wait_time(Duration::from_millis(100)),
    );
    let held = pool.borrow().unwrap();

    let started = Instant::now();
    let err = pool.borrow().unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, PoolError::BorrowTimeout(_)));
    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_millis(600), "waited {waited:?}");
    assert_eq!(pool.status().waiting, 0);

    held.close().unwrap();
    let again = pool.borrow().unwrap();
    assert_eq!(again.id(), held.id());
    assert_eq!(state.connects(), 1);
}

#[test]
fn test_release_racing_timeouts_loses_nothing() {
    let (pool, _) = start(
        config()
            .pool_max_size(1)
            .fair_mode(true)
            .borrower_max_wait_time(Duration::from_millis(30)),
    );

    for _ in 0..20 {
        let held = pool.borrow().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.borrow().map(|conn| conn.close()))
        };
        thread::sleep(Duration::from_millis(28));
        held.close().unwrap();
        let _ = waiter.join().unwrap();

        // whatever happened, the single connection is available again
        let conn = pool.borrow().unwrap();
        conn.close().unwrap();
    }
    assert_eq!(pool.status().total, 1);
}

// =============================================================================
// Reuse and eviction
// =============================================================================

#[test]
fn test_returned_connection_is_reused_with_fresh_activity() {
    let (pool, state) = start(config().pool_init_size(1).pool_max_size(1));

    let conn = pool.borrow().unwrap();
    let id = conn.id();
    let first_activity = conn.last_activity();
    thread::sleep(Duration::from_millis(10));
    conn.commit().unwrap();
    let after_call = conn.last_activity();
    assert!(after_call > first_activity);
    conn.close().unwrap();

    thread::sleep(Duration::from_millis(10));
    let conn = pool.borrow().unwrap();
    assert_eq!(conn.id(), id);
    assert!(conn.last_activity() > after_call);
    assert_eq!(state.connects(), 1);
}

#[test]
fn test_idle_connections_are_evicted_and_replenished() {
    let (pool, state) = start(
        config()
            .pool_init_size(1)
            .pool_max_size(3)
            .connection_idle_timeout(Duration::from_millis(50)),
    );
    let a = pool.borrow().unwrap();
    let b = pool.borrow().unwrap();
    let original = a.id();
    a.close().unwrap();
    b.close().unwrap();
    assert_eq!(pool.status().total, 2);

    // both go idle past the timeout; the pool refills to its init size
    assert!(wait_for(
        || pool.metrics().idle_evictions >= 2,
        Duration::from_secs(3)
    ));
    assert!(wait_for(|| pool.status().idle == 1, Duration::from_secs(3)));

    let conn = pool.borrow().unwrap();
    assert_ne!(conn.id(), original);
    assert!(state.connects() >= 3);
}

#[test]
fn test_in_use_connection_is_reported_not_closed() {
    let (pool, state) = start(
        config()
            .pool_max_size(1)
            .max_inactive_time_to_check(Duration::from_millis(20)),
    );
    let conn = pool.borrow().unwrap();

    assert!(wait_for(
        || pool.metrics().inactive_reports >= 1,
        Duration::from_secs(2)
    ));
    assert_eq!(state.connection_closes(), 0);
    assert!(conn.commit().is_ok());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_broken_connection_is_discarded() {
    let (pool, state) = start(config().pool_max_size(1));

    let conn = pool.borrow().unwrap();
    let broken_id = conn.id();
    state.break_existing_connections();
    assert!(matches!(conn.commit().unwrap_err(), PoolError::Driver(_)));
    conn.close().unwrap();

    assert_eq!(state.connection_closes(), 1);
    let fresh = pool.borrow().unwrap();
    assert_ne!(fresh.id(), broken_id);
    assert!(fresh.commit().is_ok());
}

#[test]
fn test_discard_replaces_connection_for_waiter() {
    let (pool, state) = start(
        config()
            .pool_max_size(1)
            .borrower_max_wait_time(Duration::from_secs(3)),
    );
    let conn = pool.borrow().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.borrow().map(|c| c.id()))
    };
    assert!(wait_for(|| pool.status().waiting == 1, Duration::from_secs(2)));

    state.break_existing_connections();
    let _ = conn.rollback();
    conn.close().unwrap();

    let id = waiter.join().unwrap().unwrap();
    assert_ne!(id, conn.id());
}

#[test]
fn test_failed_creation_frees_slot_for_queued_borrower() {
    let (pool, state) = start(
        config()
            .pool_max_size(1)
            .borrower_max_wait_time(Duration::from_secs(2))
            .validation_query_timeout(Duration::from_millis(200))
            .connection_idle_timeout(Duration::from_secs(60))
            .max_inactive_time_to_check(Duration::from_secs(60)),
    );
    state.set_validation_delay(Duration::from_millis(300));

    let first = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.borrow().map(|c| c.id()))
    };
    // the first borrower holds the only slot while its validation runs
    assert!(wait_for(|| pool.status().total == 1, Duration::from_secs(1)));

    let second = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let started = Instant::now();
            let result = pool.borrow().map(|c| c.id());
            (result, started.elapsed())
        })
    };
    assert!(wait_for(|| pool.status().waiting == 1, Duration::from_secs(1)));
    state.set_validation_delay(Duration::ZERO);

    assert!(matches!(
        first.join().unwrap().unwrap_err(),
        PoolError::Validation(_)
    ));
    let (result, waited) = second.join().unwrap();
    assert!(result.is_ok(), "queued borrower was stranded: {result:?}");
    assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    assert_eq!(pool.status().waiting, 0);
}

#[test]
fn test_slow_validation_is_bounded_by_its_timeout() {
    let (pool, state) = start(
        config()
            .pool_max_size(1)
            .validation_query_timeout(Duration::from_millis(50)),
    );
    state.set_validation_delay(Duration::from_secs(10));

    let started = Instant::now();
    let err = pool.borrow().unwrap_err();
    assert!(matches!(err, PoolError::Validation(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(pool.status().total, 0);
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_shutdown_fails_waiters() {
    let (pool, _) = start(
        config()
            .pool_max_size(1)
            .borrower_max_wait_time(Duration::from_secs(10)),
    );
    let _held = pool.borrow().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.borrow().map(|_| ()))
    };
    assert!(wait_for(|| pool.status().waiting == 1, Duration::from_secs(2)));

    pool.shutdown();
    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(PoolError::PoolClosed)));
    assert!(matches!(pool.borrow().unwrap_err(), PoolError::PoolClosed));
}
