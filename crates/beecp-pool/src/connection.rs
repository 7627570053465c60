//! Pooled connection lifecycle.
//!
//! A [`PooledConnection`] owns one raw driver connection and its statement
//! cache. Its [`ConnectionState`] is a single atomic word: claiming an idle
//! connection is a compare-and-swap, so borrowers never take a pool-wide lock
//! to get one.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use beecp_driver::{DriverError, RawConnection};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{PoolError, Result};
use crate::statement_cache::StatementCache;

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Available for borrowing.
    Idle = 0,
    /// Held by exactly one borrower.
    Using = 1,
    /// Being validated after creation.
    Validating = 2,
    /// Closed; never leaves this state.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Using,
            2 => Self::Validating,
            _ => Self::Closed,
        }
    }
}

/// Driver resources guarded together.
pub(crate) struct Physical {
    pub(crate) raw: Box<dyn RawConnection>,
    pub(crate) cache: StatementCache,
}

/// One raw connection plus its statement cache and lifecycle metadata.
pub struct PooledConnection {
    id: u64,
    state: AtomicU8,
    created_at: Instant,
    /// Nanoseconds after `created_at`.
    last_activity: AtomicU64,
    broken: AtomicBool,
    physical: Mutex<Option<Physical>>,
}

impl PooledConnection {
    pub(crate) fn new(
        id: u64,
        raw: Box<dyn RawConnection>,
        cache_size: usize,
        state: ConnectionState,
    ) -> Self {
        Self {
            id,
            state: AtomicU8::new(state as u8),
            created_at: Instant::now(),
            last_activity: AtomicU64::new(0),
            broken: AtomicBool::new(false),
            physical: Mutex::new(Some(Physical {
                raw,
                cache: StatementCache::new(cache_size),
            })),
        }
    }

    /// Pool-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Atomically move from `from` to `to`; `false` if the state was not `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_state(&self, to: ConnectionState) {
        self.state.store(to as u8, Ordering::Release);
    }

    /// When the raw connection was established.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time of the last borrow, return or proxied call.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.last_activity.load(Ordering::Acquire))
    }

    /// Time since [`last_activity`](Self::last_activity).
    #[must_use]
    pub fn inactive_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    pub(crate) fn touch(&self) {
        let nanos = u64::try_from(self.created_at.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_activity.fetch_max(nanos, Ordering::AcqRel);
    }

    /// Whether a driver failure has made this connection unusable.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            tracing::debug!(connection_id = self.id, "connection marked unusable");
        }
    }

    /// Number of statements currently held by this connection's cache.
    #[must_use]
    pub fn cached_statements(&self) -> usize {
        self.physical.lock().as_ref().map_or(0, |p| p.cache.len())
    }

    /// Lock the driver resources for one call.
    pub(crate) fn physical(&self) -> Result<PhysicalGuard<'_>> {
        let guard = self.physical.lock();
        if guard.is_none() {
            return Err(PoolError::PoolClosed);
        }
        Ok(PhysicalGuard { guard })
    }

    /// Run the validation query, marking the connection broken on failure.
    ///
    /// An answer arriving after `timeout` is a failure even if the driver
    /// reports success.
    pub(crate) fn validate(&self, sql: &str, timeout: Duration) -> Result<()> {
        let mut physical = self.physical()?;
        match run_validation(physical.raw.as_mut(), sql, timeout) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_broken();
                Err(PoolError::Validation(e))
            }
        }
    }

    /// Validate without waiting for a borrower's in-flight call.
    ///
    /// `None` when the connection is busy or already closed.
    pub(crate) fn try_check_alive(&self, sql: &str, timeout: Duration) -> Option<bool> {
        let mut guard = self.physical.try_lock()?;
        let physical = guard.as_mut()?;
        let alive = run_validation(physical.raw.as_mut(), sql, timeout).is_ok();
        if !alive {
            self.mark_broken();
        }
        Some(alive)
    }

    /// Release the statement cache and the raw connection.
    ///
    /// Returns `false` if the connection had already been closed.
    pub(crate) fn close(&self) -> bool {
        self.set_state(ConnectionState::Closed);
        let Some(mut physical) = self.physical.lock().take() else {
            return false;
        };
        physical.cache.drain_and_close_all();
        if let Err(e) = physical.raw.close() {
            tracing::debug!(connection_id = self.id, error = %e, "error closing raw connection");
        }
        tracing::debug!(
            connection_id = self.id,
            age_ms = self.created_at.elapsed().as_millis() as u64,
            "connection closed"
        );
        true
    }
}

fn run_validation(
    raw: &mut dyn RawConnection,
    sql: &str,
    timeout: Duration,
) -> beecp_driver::Result<()> {
    let started = Instant::now();
    raw.execute(sql, timeout)?;
    if started.elapsed() > timeout {
        return Err(DriverError::Timeout(timeout));
    }
    Ok(())
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("broken", &self.is_broken())
            .field("inactive_for", &self.inactive_for())
            .finish()
    }
}

/// Exclusive access to a live connection's driver resources.
pub(crate) struct PhysicalGuard<'a> {
    guard: MutexGuard<'a, Option<Physical>>,
}

impl std::ops::Deref for PhysicalGuard<'_> {
    type Target = Physical;

    fn deref(&self) -> &Physical {
        // checked non-empty at construction and the lock is held
        match self.guard.as_ref() {
            Some(physical) => physical,
            None => unreachable!("physical guard over a closed connection"),
        }
    }
}

impl std::ops::DerefMut for PhysicalGuard<'_> {
    fn deref_mut(&mut self) -> &mut Physical {
        match self.guard.as_mut() {
            Some(physical) => physical,
            None => unreachable!("physical guard over a closed connection"),
        }
    }
}
