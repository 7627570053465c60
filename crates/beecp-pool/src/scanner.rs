//! Background idle/inactivity sweep.
//!
//! The scanner thread holds only a [`Weak`] reference to the pool, so a
//! forgotten pool handle does not keep it alive. Each cycle it evicts idle
//! connections past `connection_idle_timeout` and reports in-use connections
//! that have been silent longer than `max_inactive_time_to_check`. In-use
//! connections are checked without blocking and never closed here.

use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::connection::ConnectionState;
use crate::pool::PoolInner;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub(crate) evicted: usize,
    pub(crate) inactive: usize,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the running scanner thread.
pub(crate) struct IdleScanner {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl IdleScanner {
    pub(crate) fn start(pool: Weak<PoolInner>, period: Duration) -> io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("beecp-idle-scanner".to_string())
            .spawn(move || run(&pool, period, &thread_signal))?;
        tracing::debug!(period_ms = period.as_millis() as u64, "idle scanner started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for an in-progress sweep to finish.
    pub(crate) fn stop(mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("idle scanner thread panicked");
            }
        }
        tracing::debug!("idle scanner stopped");
    }
}

fn run(pool: &Weak<PoolInner>, period: Duration, signal: &StopSignal) {
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if !*stopped {
                signal.wake.wait_for(&mut stopped, period);
            }
            if *stopped {
                return;
            }
        }
        let Some(pool) = pool.upgrade() else {
            return;
        };
        if pool.is_closed() {
            return;
        }
        sweep(&pool);
    }
}

/// Run one scanner cycle against `pool`.
pub(crate) fn sweep(pool: &Arc<PoolInner>) -> SweepReport {
    let config = pool.config();
    let mut report = SweepReport::default();

    for conn in pool.snapshot() {
        let inactive_for = conn.inactive_for();
        match conn.state() {
            ConnectionState::Idle if inactive_for > config.connection_idle_timeout => {
                // a borrower claiming it first wins
                if conn.transition(ConnectionState::Idle, ConnectionState::Closed) {
                    tracing::debug!(
                        connection_id = conn.id(),
                        idle_ms = inactive_for.as_millis() as u64,
                        "evicting idle connection"
                    );
                    pool.discard(&conn);
                    report.evicted += 1;
                }
            }
            ConnectionState::Using if inactive_for > config.max_inactive_time_to_check => {
                let alive = if config.validation_enabled() {
                    conn.try_check_alive(
                        &config.validation_query_sql,
                        config.validation_query_timeout,
                    )
                } else {
                    None
                };
                tracing::warn!(
                    connection_id = conn.id(),
                    inactive_ms = inactive_for.as_millis() as u64,
                    alive = ?alive,
                    "in-use connection has been inactive"
                );
                report.inactive += 1;
            }
            _ => {}
        }
    }

    pool.record_sweep(report);
    if report.evicted > 0 {
        tracing::debug!(
            evicted = report.evicted,
            total = pool.size(),
            "idle sweep finished"
        );
    }
    pool.replenish();
    report
}
