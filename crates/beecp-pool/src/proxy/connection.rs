use std::sync::Arc;
use std::time::Instant;

use beecp_driver::{RawCallableStatement, RawPreparedStatement, StatementOptions};
use parking_lot::Mutex;

use super::{Lease, StatementShared};
use crate::connection::PooledConnection;
use crate::error::{PoolError, Result};
use crate::pool::PoolInner;
use crate::proxy::{CallableStatementProxy, PreparedStatementProxy, StatementProxy};
use crate::statement_cache::{CacheKey, CachedStatement, Shared};

/// A borrowed connection.
///
/// Closing the proxy, or dropping it, returns the connection to the pool. A
/// transaction left open with auto-commit disabled is rolled back on return.
pub struct ConnectionProxy {
    lease: Arc<Lease>,
}

impl ConnectionProxy {
    pub(crate) fn new(pool: Arc<PoolInner>, conn: Arc<PooledConnection>) -> Self {
        Self {
            lease: Arc::new(Lease::new(pool, conn)),
        }
    }

    /// Id of the underlying pooled connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.lease.conn.id()
    }

    /// Time of the last call made through this connection or its statements.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.lease.conn.last_activity()
    }

    /// Whether the proxy was closed or the pool shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lease.is_closed()
    }

    /// Create a plain statement with default options.
    pub fn create_statement(&self) -> Result<StatementProxy> {
        self.create_statement_with(&StatementOptions::new())
    }

    /// Create a plain statement.
    pub fn create_statement_with(&self, options: &StatementOptions) -> Result<StatementProxy> {
        let mut physical = self.lease.physical()?;
        let raw = self.lease.observe(physical.raw.create_statement(options))?;
        Ok(StatementProxy::new(raw, self.statement_shared()))
    }

    /// Prepare a statement with default options.
    pub fn prepare_statement(&self, sql: &str) -> Result<PreparedStatementProxy> {
        self.prepare_statement_with(sql, &StatementOptions::new())
    }

    /// Prepare a statement, sharing a cached one with the same SQL and options.
    ///
    /// A newly compiled statement is cached right away, evicting the least
    /// recently used entry when the cache is full.
    pub fn prepare_statement_with(
        &self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<PreparedStatementProxy> {
        let key = CacheKey::prepared(sql, options);
        let mut physical = self.lease.physical()?;
        let managed = physical.cache.is_enabled();
        let raw = match physical.cache.get(&key) {
            Some(CachedStatement::Prepared(raw)) => raw,
            _ => {
                let compiled = self.lease.observe(physical.raw.prepare(sql, options))?;
                let raw: Shared<dyn RawPreparedStatement> = Arc::new(Mutex::new(compiled));
                let entry = CachedStatement::Prepared(Arc::clone(&raw));
                if let Some(evicted) = physical.cache.put(key, entry) {
                    evicted.retire();
                }
                raw
            }
        };
        Ok(PreparedStatementProxy::new(raw, self.statement_shared(), managed))
    }

    /// Prepare a stored procedure call with default options.
    pub fn prepare_call(&self, sql: &str) -> Result<CallableStatementProxy> {
        self.prepare_call_with(sql, &StatementOptions::new())
    }

    /// Prepare a stored procedure call, sharing a cached one when possible.
    pub fn prepare_call_with(
        &self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<CallableStatementProxy> {
        let key = CacheKey::callable(sql, options);
        let mut physical = self.lease.physical()?;
        let managed = physical.cache.is_enabled();
        let raw = match physical.cache.get(&key) {
            Some(CachedStatement::Callable(raw)) => raw,
            _ => {
                let compiled = self.lease.observe(physical.raw.prepare_call(sql, options))?;
                let raw: Shared<dyn RawCallableStatement> = Arc::new(Mutex::new(compiled));
                let entry = CachedStatement::Callable(Arc::clone(&raw));
                if let Some(evicted) = physical.cache.put(key, entry) {
                    evicted.retire();
                }
                raw
            }
        };
        Ok(CallableStatementProxy::new(raw, self.statement_shared(), managed))
    }

    /// Current auto-commit mode.
    pub fn auto_commit(&self) -> Result<bool> {
        let physical = self.lease.physical()?;
        self.lease.observe(physical.raw.auto_commit())
    }

    /// Switch auto-commit mode.
    pub fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let mut physical = self.lease.physical()?;
        self.lease.observe(physical.raw.set_auto_commit(enabled))
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> Result<()> {
        let mut physical = self.lease.physical()?;
        self.lease.observe(physical.raw.commit())
    }

    /// Roll back the current transaction.
    pub fn rollback(&self) -> Result<()> {
        let mut physical = self.lease.physical()?;
        self.lease.observe(physical.raw.rollback())
    }

    /// Return the connection to the pool.
    ///
    /// A second call fails with [`PoolError::ClosedResource`]. After pool
    /// shutdown the first call still succeeds and does nothing.
    pub fn close(&self) -> Result<()> {
        if self.lease.release() {
            Ok(())
        } else {
            Err(PoolError::ClosedResource("connection"))
        }
    }

    fn statement_shared(&self) -> Arc<StatementShared> {
        StatementShared::new(Arc::clone(&self.lease))
    }
}

impl Drop for ConnectionProxy {
    fn drop(&mut self) {
        self.lease.release();
    }
}

impl std::fmt::Debug for ConnectionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProxy")
            .field("connection", &self.lease.conn)
            .field("closed", &self.is_closed())
            .finish()
    }
}
