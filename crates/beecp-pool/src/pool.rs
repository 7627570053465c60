//! Connection pool implementation.
//!
//! The pool keeps every [`PooledConnection`] in one list and arbitrates
//! ownership through each connection's atomic state. A borrow first tries to
//! claim an idle connection, then to reserve a free slot and create one, and
//! finally parks in the configured [`WaitStrategy`](crate::wait) until a
//! connection is handed over or the wait time runs out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use beecp_driver::{Driver, DriverRegistry, RawConnection};
use parking_lot::{Mutex, RwLock};

use crate::config::{CheckedConfig, PoolConfig};
use crate::connection::{ConnectionState, PooledConnection};
use crate::error::{PoolError, Result};
use crate::proxy::ConnectionProxy;
use crate::scanner::{IdleScanner, SweepReport};
use crate::wait::{self, Borrower, WaitOutcome, WaitStrategy};

/// A pool of database connections.
///
/// The pool hands out [`ConnectionProxy`] handles. Closing or dropping a
/// proxy returns its connection to the pool, or directly to a waiting
/// borrower. Dropping the pool shuts it down.
///
/// # Example
///
/// ```rust,ignore
/// use beecp_pool::{ConnectionPool, PoolConfig};
///
/// let config = PoolConfig::new("org.example.Driver", "example://db", "app", "secret")
///     .pool_init_size(2)
///     .pool_max_size(8);
///
/// let pool = ConnectionPool::initialize(config, &registry)?;
///
/// let conn = pool.borrow()?;
/// let mut stmt = conn.prepare_statement("select name from users where id = ?")?;
/// stmt.bind(1, 42.into())?;
/// let mut rows = stmt.execute_query()?;
/// // ...
/// conn.close()?;
/// ```
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    /// Frozen configuration.
    config: CheckedConfig,

    /// Resolved driver.
    driver: Arc<dyn Driver>,

    /// Every live connection regardless of state.
    connections: RwLock<Vec<Arc<PooledConnection>>>,

    /// Reserved slots: live connections plus creations in flight.
    size: AtomicUsize,

    /// Whether the pool is closed.
    closed: AtomicBool,

    /// Parked borrowers.
    waiters: Box<dyn WaitStrategy>,

    /// Background sweep; taken on shutdown.
    scanner: Mutex<Option<IdleScanner>>,

    /// Whether a replenish thread is running.
    replenishing: AtomicBool,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    borrows_successful: u64,
    borrows_timed_out: u64,
    borrows_failed: u64,
    handoffs: u64,
    idle_evictions: u64,
    inactive_reports: u64,
    validations_performed: u64,
    validations_failed: u64,
    resets_performed: u64,
    resets_failed: u64,
}

impl ConnectionPool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Validate `config`, resolve its driver and start the pool.
    ///
    /// `pool_init_size` connections are created eagerly. A failure to create
    /// one is logged and leaves the pool smaller; only configuration and
    /// driver resolution errors abort startup.
    pub fn initialize(config: PoolConfig, registry: &DriverRegistry) -> Result<Self> {
        let config = config.check()?;
        let driver = registry
            .resolve(&config.driver, &config.url)
            .map_err(PoolError::DriverLoad)?;

        let inner = Arc::new(PoolInner {
            waiters: wait::strategy(config.fair_mode),
            connections: RwLock::new(Vec::with_capacity(config.pool_max_size)),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            scanner: Mutex::new(None),
            replenishing: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            driver,
            config,
        });

        for _ in 0..inner.config.pool_init_size {
            if !inner.reserve_slot() {
                break;
            }
            match inner.create_connection() {
                Ok(conn) => inner.publish(conn),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create initial connection");
                    break;
                }
            }
        }

        let scanner = IdleScanner::start(Arc::downgrade(&inner), inner.config.scan_period())
            .map_err(PoolError::Scanner)?;
        *inner.scanner.lock() = Some(scanner);

        tracing::info!(
            init = inner.config.pool_init_size,
            max = inner.config.pool_max_size,
            created = inner.size(),
            mode = inner.waiters.name(),
            "connection pool initialized"
        );

        Ok(Self { inner })
    }

    /// Borrow a connection.
    ///
    /// Blocks for at most `borrower_max_wait_time` when the pool is exhausted.
    pub fn borrow(&self) -> Result<ConnectionProxy> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!("acquiring connection from pool");

        let result = inner.acquire();
        {
            let mut metrics = inner.metrics.lock();
            match &result {
                Ok(_) => metrics.borrows_successful += 1,
                Err(PoolError::BorrowTimeout(_)) => metrics.borrows_timed_out += 1,
                Err(_) => metrics.borrows_failed += 1,
            }
        }
        let conn = result?;

        // shutdown raced with the borrow
        if inner.is_closed() {
            inner.recycle(conn);
            return Err(PoolError::PoolClosed);
        }

        conn.touch();
        tracing::trace!(connection_id = conn.id(), "connection borrowed");
        Ok(ConnectionProxy::new(Arc::clone(inner), conn))
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let (mut idle, mut in_use) = (0, 0);
        for conn in self.inner.connections.read().iter() {
            match conn.state() {
                ConnectionState::Idle => idle += 1,
                ConnectionState::Using => in_use += 1,
                ConnectionState::Validating | ConnectionState::Closed => {}
            }
        }
        PoolStatus {
            idle,
            in_use,
            total: self.inner.size(),
            max: self.inner.config.pool_max_size,
            waiting: self.inner.waiters.waiting(),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            borrows_successful: inner.borrows_successful,
            borrows_timed_out: inner.borrows_timed_out,
            borrows_failed: inner.borrows_failed,
            handoffs: inner.handoffs,
            idle_evictions: inner.idle_evictions,
            inactive_reports: inner.inactive_reports,
            validations_performed: inner.validations_performed,
            validations_failed: inner.validations_failed,
            resets_performed: inner.resets_performed,
            resets_failed: inner.resets_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Shut the pool down.
    ///
    /// Waiting and future borrowers fail with [`PoolError::PoolClosed`].
    /// Every connection is closed, including ones still held by borrowers;
    /// their proxies fail with `PoolClosed` from then on.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<PoolInner> {
        &self.inner
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    pub(crate) fn config(&self) -> &CheckedConfig {
        &self.config
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<PooledConnection>> {
        self.connections.read().clone()
    }

    fn acquire(self: &Arc<Self>) -> Result<Arc<PooledConnection>> {
        if self.waiters.may_acquire(None) {
            if let Some(conn) = self.claim_idle() {
                return Ok(conn);
            }
            if self.reserve_slot() {
                return self.create_connection();
            }
        }
        self.wait_for_connection()
    }

    /// Claim any idle connection with a compare-and-swap.
    fn claim_idle(&self) -> Option<Arc<PooledConnection>> {
        self.connections
            .read()
            .iter()
            .find(|conn| conn.transition(ConnectionState::Idle, ConnectionState::Using))
            .cloned()
    }

    /// Reserve room for one more connection if below `pool_max_size`.
    fn reserve_slot(&self) -> bool {
        let max = self.config.pool_max_size;
        self.size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                (size < max).then_some(size + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.size.fetch_sub(1, Ordering::AcqRel);
    }

    /// Release the slot of a failed creation; borrowers that queued while it
    /// was reserved get a replacement attempt.
    fn abandon_slot(self: &Arc<Self>) {
        self.release_slot();
        if self.waiters.waiting() > 0 {
            self.replenish();
        }
    }

    /// Open and validate a connection in a reserved slot.
    ///
    /// The new connection is returned in `Using` state. On failure the slot is
    /// released and offered to anyone who queued behind it.
    fn create_connection(self: &Arc<Self>) -> Result<Arc<PooledConnection>> {
        let raw = match self
            .driver
            .connect(&self.config.url, self.config.connect_properties())
        {
            Ok(raw) => raw,
            Err(e) => {
                self.abandon_slot();
                tracing::debug!(error = %e, "driver failed to open connection");
                return Err(PoolError::ConnectionCreate(e));
            }
        };

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(PooledConnection::new(
            id,
            raw,
            self.config.prepared_statement_cache_size,
            ConnectionState::Validating,
        ));

        if self.config.validation_enabled() {
            let validated = conn.validate(
                &self.config.validation_query_sql,
                self.config.validation_query_timeout,
            );
            let mut metrics = self.metrics.lock();
            metrics.validations_performed += 1;
            if let Err(e) = validated {
                metrics.validations_failed += 1;
                drop(metrics);
                conn.close();
                self.abandon_slot();
                tracing::debug!(connection_id = id, error = %e, "new connection failed validation");
                return Err(e);
            }
        }

        conn.touch();
        conn.set_state(ConnectionState::Using);
        self.connections.write().push(Arc::clone(&conn));
        self.metrics.lock().connections_created += 1;

        // shutdown raced with creation
        if self.is_closed() {
            self.discard(&conn);
            return Err(PoolError::PoolClosed);
        }

        tracing::debug!(connection_id = id, total = self.size(), "connection created");
        Ok(conn)
    }

    fn wait_for_connection(self: &Arc<Self>) -> Result<Arc<PooledConnection>> {
        let max_wait = self.config.borrower_max_wait_time;
        let deadline = Instant::now() + max_wait;
        let borrower = Borrower::new();
        self.waiters.enqueue(&borrower);
        tracing::trace!(waiting = self.waiters.waiting(), "pool exhausted, waiting");

        loop {
            if self.is_closed() {
                self.leave(&borrower);
                return Err(PoolError::PoolClosed);
            }
            // a connection or a slot may have been freed after the last attempt
            if self.waiters.may_acquire(Some(&borrower)) {
                if let Some(conn) = self.claim_idle() {
                    self.leave(&borrower);
                    return Ok(conn);
                }
                if self.reserve_slot() {
                    self.leave(&borrower);
                    return self.create_connection();
                }
            }
            match borrower.wait_until(deadline) {
                WaitOutcome::Transferred(conn) => {
                    self.waiters.cancel(&borrower);
                    return Ok(conn);
                }
                WaitOutcome::Signaled => {}
                WaitOutcome::Closed => return Err(PoolError::PoolClosed),
                WaitOutcome::TimedOut => {
                    self.waiters.cancel(&borrower);
                    tracing::debug!(wait_ms = max_wait.as_millis() as u64, "borrow timed out");
                    return Err(PoolError::BorrowTimeout(max_wait));
                }
            }
        }
    }

    /// Withdraw a borrower that got its connection some other way.
    fn leave(&self, borrower: &Arc<Borrower>) {
        self.waiters.cancel(borrower);
        if let Some(extra) = borrower.abandon() {
            self.publish(extra);
        }
    }

    /// Hand a `Using` connection to a waiter, or make it idle.
    fn publish(&self, conn: Arc<PooledConnection>) {
        let id = conn.id();
        match self.waiters.handoff(conn) {
            None => {
                self.metrics.lock().handoffs += 1;
                tracing::trace!(connection_id = id, "connection handed to waiting borrower");
            }
            Some(conn) => {
                conn.set_state(ConnectionState::Idle);
                self.waiters.idle_published(&conn);
            }
        }
    }

    /// Return a borrowed connection.
    pub(crate) fn recycle(self: &Arc<Self>, conn: Arc<PooledConnection>) {
        if !conn.is_broken() && !self.is_closed() {
            self.reset(&conn);
        }
        if conn.is_broken() || self.is_closed() {
            self.discard(&conn);
            self.replenish();
            return;
        }
        conn.touch();
        tracing::trace!(connection_id = conn.id(), "connection returned to pool");
        self.publish(conn);
    }

    /// Roll back a transaction left open by the borrower.
    fn reset(&self, conn: &PooledConnection) {
        let Ok(mut physical) = conn.physical() else {
            return;
        };
        match reset_connection(physical.raw.as_mut()) {
            Ok(false) => {}
            Ok(true) => self.metrics.lock().resets_performed += 1,
            Err(e) => {
                self.metrics.lock().resets_failed += 1;
                tracing::debug!(connection_id = conn.id(), error = %e, "connection reset failed");
                conn.mark_broken();
            }
        }
    }

    /// Close a connection and free its slot.
    pub(crate) fn discard(&self, conn: &Arc<PooledConnection>) {
        if !conn.close() {
            return;
        }
        self.connections.write().retain(|c| !Arc::ptr_eq(c, conn));
        self.release_slot();
        self.metrics.lock().connections_closed += 1;
    }

    pub(crate) fn record_sweep(&self, report: SweepReport) {
        let mut metrics = self.metrics.lock();
        metrics.idle_evictions += report.evicted as u64;
        metrics.inactive_reports += report.inactive as u64;
    }

    fn needs_replenish(&self) -> bool {
        let size = self.size();
        size < self.config.pool_init_size
            || (size < self.config.pool_max_size && self.waiters.waiting() > 0)
    }

    /// Top the pool up in the background.
    pub(crate) fn replenish(self: &Arc<Self>) {
        if self.is_closed() || !self.needs_replenish() {
            return;
        }
        if self.replenishing.swap(true, Ordering::AcqRel) {
            return;
        }
        let pool = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("beecp-replenish".to_string())
            .spawn(move || {
                pool.fill();
                pool.replenishing.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            self.replenishing.store(false, Ordering::Release);
            tracing::warn!(error = %e, "failed to spawn replenish thread");
        }
    }

    fn fill(self: &Arc<Self>) {
        while !self.is_closed() && self.needs_replenish() && self.reserve_slot() {
            match self.create_connection() {
                Ok(conn) => self.publish(conn),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to replenish connection");
                    return;
                }
            }
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let scanner = self.scanner.lock().take();
        if let Some(scanner) = scanner {
            scanner.stop();
        }
        self.waiters.close_all();

        let connections = std::mem::take(&mut *self.connections.write());
        let mut closed = 0;
        for conn in &connections {
            if conn.close() {
                self.release_slot();
                closed += 1;
            }
        }
        self.metrics.lock().connections_closed += closed;

        tracing::info!(closed = closed, "connection pool closed");
    }
}

/// Restore auto-commit, rolling back first. `true` when a reset was needed.
fn reset_connection(raw: &mut dyn RawConnection) -> beecp_driver::Result<bool> {
    if raw.auto_commit()? {
        return Ok(false);
    }
    raw.rollback()?;
    raw.set_auto_commit(true)?;
    Ok(true)
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = ConnectionPool::builder()
///     .config(PoolConfig::new(driver, url, user, password))
///     .pool_max_size(20)
///     .fair_mode(true)
///     .build(&registry)?;
/// ```
#[derive(Debug, Default)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the driver name and connection URL.
    #[must_use]
    pub fn connect_to(mut self, driver: impl Into<String>, url: impl Into<String>) -> Self {
        self.config = self.config.driver(driver).url(url);
        self
    }

    /// Set the number of connections created at startup.
    #[must_use]
    pub fn pool_init_size(mut self, size: usize) -> Self {
        self.config.pool_init_size = size;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn pool_max_size(mut self, size: usize) -> Self {
        self.config.pool_max_size = size;
        self
    }

    /// Enable or disable fair mode.
    #[must_use]
    pub fn fair_mode(mut self, fair: bool) -> Self {
        self.config.fair_mode = fair;
        self
    }

    /// Set the maximum borrower wait time.
    #[must_use]
    pub fn borrower_max_wait_time(mut self, wait: Duration) -> Self {
        self.config.borrower_max_wait_time = wait;
        self
    }

    /// Set the idle eviction threshold.
    #[must_use]
    pub fn connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_idle_timeout = timeout;
        self
    }

    /// Set the prepared statement cache capacity.
    #[must_use]
    pub fn prepared_statement_cache_size(mut self, size: usize) -> Self {
        self.config.prepared_statement_cache_size = size;
        self
    }

    /// Build and start the pool.
    pub fn build(self, registry: &DriverRegistry) -> Result<ConnectionPool> {
        ConnectionPool::initialize(self.config, registry)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: usize,
    /// Number of connections currently in use.
    pub in_use: usize,
    /// Total number of connections, including ones being created.
    pub total: usize,
    /// Maximum allowed connections.
    pub max: usize,
    /// Number of parked borrowers.
    pub waiting: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Borrows that returned a connection.
    pub borrows_successful: u64,
    /// Borrows that ran out of wait time.
    pub borrows_timed_out: u64,
    /// Borrows that failed otherwise (creation, validation, shutdown).
    pub borrows_failed: u64,
    /// Returned connections passed straight to a waiting borrower.
    pub handoffs: u64,
    /// Idle connections closed by the scanner.
    pub idle_evictions: u64,
    /// In-use connections reported as inactive.
    pub inactive_reports: u64,
    /// Validation queries run on new connections.
    pub validations_performed: u64,
    /// Validation queries that failed.
    pub validations_failed: u64,
    /// Open transactions rolled back on return.
    pub resets_performed: u64,
    /// Rollbacks on return that failed.
    pub resets_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate borrow success rate (0.0 to 1.0).
    #[must_use]
    pub fn borrow_success_rate(&self) -> f64 {
        let total = self.borrows_successful + self.borrows_timed_out + self.borrows_failed;
        if total == 0 {
            return 1.0;
        }
        self.borrows_successful as f64 / total as f64
    }

    /// Calculate validation success rate (0.0 to 1.0).
    #[must_use]
    pub fn validation_success_rate(&self) -> f64 {
        if self.validations_performed == 0 {
            return 1.0;
        }
        let successful = self.validations_performed - self.validations_failed;
        successful as f64 / self.validations_performed as f64
    }
}

#[cfg(test)]
mod tests {
    use beecp_testing::{MOCK_DRIVER_NAME, MOCK_URL, mock_registry};

    use super::*;

    fn config() -> PoolConfig {
        PoolConfig::new(MOCK_DRIVER_NAME, MOCK_URL, "sa", "secret")
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            idle: 5,
            in_use: 5,
            total: 10,
            max: 20,
            waiting: 0,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            idle: 0,
            in_use: 10,
            total: 10,
            max: 10,
            waiting: 3,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            idle: 5,
            in_use: 5,
            total: 10,
            max: 20,
            waiting: 0,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            borrows_successful: 90,
            borrows_timed_out: 6,
            borrows_failed: 4,
            handoffs: 12,
            idle_evictions: 1,
            inactive_reports: 0,
            validations_performed: 100,
            validations_failed: 5,
            resets_performed: 3,
            resets_failed: 0,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.borrow_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.validation_success_rate() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_fluent() {
        let builder = ConnectionPool::builder()
            .connect_to(MOCK_DRIVER_NAME, MOCK_URL)
            .pool_init_size(2)
            .pool_max_size(5)
            .fair_mode(true);

        assert_eq!(builder.config.pool_init_size, 2);
        assert_eq!(builder.config.pool_max_size, 5);
        assert!(builder.config.fair_mode);
    }

    #[test]
    fn test_initialize_creates_init_size() {
        let (registry, state) = mock_registry();
        let pool = ConnectionPool::initialize(config().pool_init_size(3), &registry).unwrap();

        let status = pool.status();
        assert_eq!(status.idle, 3);
        assert_eq!(status.total, 3);
        assert_eq!(state.connects(), 3);
        assert_eq!(state.validations(), 3);
        assert_eq!(state.last_properties().get("user").unwrap(), "sa");
    }

    #[test]
    fn test_initialize_rejects_unknown_driver() {
        let (registry, _) = mock_registry();
        let err =
            ConnectionPool::initialize(PoolConfig::new("nope", "nope://db", "", ""), &registry)
                .unwrap_err();
        assert!(matches!(err, PoolError::DriverLoad(_)));
    }

    #[test]
    fn test_initialize_survives_connect_failure() {
        let (registry, state) = mock_registry();
        state.set_fail_connect(true);
        let pool = ConnectionPool::initialize(config().pool_init_size(2), &registry).unwrap();
        assert_eq!(pool.status().total, 0);

        state.set_fail_connect(false);
        let conn = pool.borrow().unwrap();
        assert_eq!(pool.status().in_use, 1);
        conn.close().unwrap();
    }

    #[test]
    fn test_borrow_creates_on_demand_up_to_max() {
        let (registry, _) = mock_registry();
        let pool = ConnectionPool::initialize(
            config()
                .pool_max_size(2)
                .borrower_max_wait_time(Duration::from_millis(30)),
            &registry,
        )
        .unwrap();

        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        assert_ne!(a.id(), b.id());
        assert!(pool.status().is_at_capacity());
        assert!(pool.borrow().unwrap_err().is_timeout());
        assert_eq!(pool.metrics().borrows_timed_out, 1);
    }

    #[test]
    fn test_connect_failure_releases_slot() {
        let (registry, state) = mock_registry();
        let pool = ConnectionPool::initialize(config().pool_max_size(1), &registry).unwrap();

        state.set_fail_connect(true);
        assert!(matches!(
            pool.borrow().unwrap_err(),
            PoolError::ConnectionCreate(_)
        ));
        assert_eq!(pool.status().total, 0);

        state.set_fail_connect(false);
        assert!(pool.borrow().is_ok());
    }

    #[test]
    fn test_validation_failure_discards_new_connection() {
        let (registry, state) = mock_registry();
        let pool = ConnectionPool::initialize(config().pool_max_size(1), &registry).unwrap();

        state.set_fail_validation(true);
        assert!(matches!(pool.borrow().unwrap_err(), PoolError::Validation(_)));
        assert_eq!(state.open_connections(), 0);
        assert_eq!(pool.status().total, 0);

        let metrics = pool.metrics();
        assert_eq!(metrics.validations_failed, 1);
        assert!(metrics.validation_success_rate() < 1.0);
    }

    #[test]
    fn test_blank_validation_sql_skips_validation() {
        let (registry, state) = mock_registry();
        let pool =
            ConnectionPool::initialize(config().validation_query_sql("").pool_init_size(1), &registry)
                .unwrap();
        assert_eq!(pool.status().total, 1);
        assert_eq!(state.validations(), 0);
    }

    #[test]
    fn test_return_rolls_back_open_transaction() {
        let (registry, state) = mock_registry();
        let pool = ConnectionPool::initialize(config().pool_max_size(1), &registry).unwrap();

        let conn = pool.borrow().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.close().unwrap();
        assert_eq!(state.rollbacks(), 1);
        assert_eq!(pool.metrics().resets_performed, 1);

        let conn = pool.borrow().unwrap();
        assert!(conn.auto_commit().unwrap());
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let (registry, state) = mock_registry();
        let pool = ConnectionPool::initialize(config().pool_init_size(2), &registry).unwrap();
        let held = pool.borrow().unwrap();

        pool.shutdown();
        assert!(pool.is_closed());
        assert_eq!(state.open_connections(), 0);
        assert!(matches!(pool.borrow().unwrap_err(), PoolError::PoolClosed));
        assert!(matches!(held.commit().unwrap_err(), PoolError::PoolClosed));
        // closing a surviving proxy is harmless
        assert!(held.close().is_ok());
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_drop_shuts_down() {
        let (registry, state) = mock_registry();
        let pool = ConnectionPool::initialize(config().pool_init_size(2), &registry).unwrap();
        drop(pool);
        assert_eq!(state.open_connections(), 0);
    }
}
