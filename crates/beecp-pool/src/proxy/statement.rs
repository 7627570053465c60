use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use beecp_driver::{
    RawCallableStatement, RawPreparedStatement, RawResultSet, RawStatement, Value,
};
use parking_lot::{Mutex, MutexGuard};

use super::StatementShared;
use crate::error::{PoolError, Result};
use crate::proxy::ResultSetProxy;
use crate::statement_cache::Shared;

/// Driver statements the proxies can hold.
trait RawHandle: Send {
    fn clear(&mut self) -> beecp_driver::Result<()>;

    fn close_raw(&mut self) -> beecp_driver::Result<()>;
}

impl RawHandle for dyn RawStatement {
    fn clear(&mut self) -> beecp_driver::Result<()> {
        Ok(())
    }

    fn close_raw(&mut self) -> beecp_driver::Result<()> {
        self.close()
    }
}

impl RawHandle for dyn RawPreparedStatement {
    fn clear(&mut self) -> beecp_driver::Result<()> {
        self.clear_parameters()
    }

    fn close_raw(&mut self) -> beecp_driver::Result<()> {
        self.close()
    }
}

impl RawHandle for dyn RawCallableStatement {
    fn clear(&mut self) -> beecp_driver::Result<()> {
        self.clear_parameters()
    }

    fn close_raw(&mut self) -> beecp_driver::Result<()> {
        self.close()
    }
}

/// Lifecycle shared by every statement proxy.
struct StatementCore<T: ?Sized + RawHandle> {
    raw: Option<Shared<T>>,
    shared: Arc<StatementShared>,
    /// The connection's statement cache owns `raw`.
    managed: bool,
}

impl<T: ?Sized + RawHandle> StatementCore<T> {
    fn new(raw: Shared<T>, shared: Arc<StatementShared>, managed: bool) -> Self {
        Self {
            raw: Some(raw),
            shared,
            managed,
        }
    }

    fn enter(&mut self) -> Result<MutexGuard<'_, Box<T>>> {
        self.shared.check()?;
        self.raw
            .as_ref()
            .map(|raw| raw.lock())
            .ok_or(PoolError::ClosedResource("statement"))
    }

    fn observe<R>(&self, result: beecp_driver::Result<R>) -> Result<R> {
        self.shared.lease.observe(result)
    }

    fn wrap(&self, raw: Box<dyn RawResultSet>) -> ResultSetProxy {
        ResultSetProxy::new(raw, Arc::downgrade(&self.shared))
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) || self.shared.lease.is_closed()
    }

    fn close(&mut self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(PoolError::ClosedResource("statement"));
        }
        self.release()
    }

    /// Drop this proxy's hold on the statement.
    ///
    /// A cache-managed statement only has its parameters cleared; it is
    /// closed here only if the cache evicted it while this proxy held it.
    fn release(&mut self) -> Result<()> {
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };
        if !self.managed {
            return raw.lock().close_raw().map_err(PoolError::Driver);
        }

        let lease = &self.shared.lease;
        // a closed connection took its cached statements with it
        let Ok(_physical) = lease.conn.physical() else {
            return Ok(());
        };
        if Arc::strong_count(&raw) == 1 {
            return raw.lock().close_raw().map_err(PoolError::Driver);
        }
        // after return the statement belongs to the next borrower
        if !lease.is_closed() {
            if let Err(e) = raw.lock().clear() {
                tracing::debug!(error = %e, "failed to clear cached statement parameters");
            }
        }
        Ok(())
    }
}

impl<T: ?Sized + RawHandle> Drop for StatementCore<T> {
    fn drop(&mut self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.release() {
                tracing::debug!(error = %e, "error releasing dropped statement");
            }
        }
    }
}

/// A plain statement.
pub struct StatementProxy {
    core: StatementCore<dyn RawStatement>,
}

impl StatementProxy {
    pub(crate) fn new(raw: Box<dyn RawStatement>, shared: Arc<StatementShared>) -> Self {
        Self {
            core: StatementCore::new(Arc::new(Mutex::new(raw)), shared, false),
        }
    }

    fn enter(&mut self) -> Result<MutexGuard<'_, Box<dyn RawStatement>>> {
        self.core.enter()
    }

    fn observe<T>(&self, result: beecp_driver::Result<T>) -> Result<T> {
        self.core.observe(result)
    }

    forward! {
        /// Execute DML/DDL returning the affected row count.
        fn execute_update(&mut self, sql: &str) -> u64;
        /// Execute arbitrary SQL; `true` when a result set is available.
        fn execute(&mut self, sql: &str) -> bool;
        /// Bound the execution time of subsequent calls.
        fn set_query_timeout(&mut self, timeout: Duration) -> ();
    }

    /// Execute a query.
    pub fn execute_query(&mut self, sql: &str) -> Result<ResultSetProxy> {
        let result = self.enter()?.execute_query(sql);
        let raw = self.observe(result)?;
        Ok(self.core.wrap(raw))
    }

    /// Take the result set produced by the last [`execute`](Self::execute).
    pub fn result_set(&mut self) -> Result<Option<ResultSetProxy>> {
        let result = self.enter()?.result_set();
        let raw = self.observe(result)?;
        Ok(raw.map(|raw| self.core.wrap(raw)))
    }

    /// Whether the statement, its connection or the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Close the statement.
    pub fn close(&mut self) -> Result<()> {
        self.core.close()
    }
}

/// A prepared statement.
///
/// When the statement cache is enabled, proxies for the same SQL and options
/// on one connection share a single compiled statement, and closing the proxy
/// only clears its parameters.
pub struct PreparedStatementProxy {
    core: StatementCore<dyn RawPreparedStatement>,
}

impl PreparedStatementProxy {
    pub(crate) fn new(
        raw: Shared<dyn RawPreparedStatement>,
        shared: Arc<StatementShared>,
        managed: bool,
    ) -> Self {
        Self {
            core: StatementCore::new(raw, shared, managed),
        }
    }

    fn enter(&mut self) -> Result<MutexGuard<'_, Box<dyn RawPreparedStatement>>> {
        self.core.enter()
    }

    fn observe<T>(&self, result: beecp_driver::Result<T>) -> Result<T> {
        self.core.observe(result)
    }

    forward! {
        /// Bind a value to a 1-based parameter index.
        fn bind(&mut self, index: usize, value: Value) -> ();
        /// Clear all bound parameters.
        fn clear_parameters(&mut self) -> ();
        /// Execute as an update.
        fn execute_update(&mut self) -> u64;
        /// Execute; `true` when a result set is available.
        fn execute(&mut self) -> bool;
        /// Bound the execution time of subsequent calls.
        fn set_query_timeout(&mut self, timeout: Duration) -> ();
    }

    /// Execute as a query.
    pub fn execute_query(&mut self) -> Result<ResultSetProxy> {
        let result = self.enter()?.execute_query();
        let raw = self.observe(result)?;
        Ok(self.core.wrap(raw))
    }

    /// Take the result set produced by the last [`execute`](Self::execute).
    pub fn result_set(&mut self) -> Result<Option<ResultSetProxy>> {
        let result = self.enter()?.result_set();
        let raw = self.observe(result)?;
        Ok(raw.map(|raw| self.core.wrap(raw)))
    }

    /// Whether the connection's statement cache owns the compiled statement.
    #[must_use]
    pub fn is_cache_managed(&self) -> bool {
        self.core.managed
    }

    /// Whether the statement, its connection or the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Close the statement.
    pub fn close(&mut self) -> Result<()> {
        self.core.close()
    }
}

impl std::fmt::Debug for PreparedStatementProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatementProxy")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A stored procedure call.
pub struct CallableStatementProxy {
    core: StatementCore<dyn RawCallableStatement>,
}

impl CallableStatementProxy {
    pub(crate) fn new(
        raw: Shared<dyn RawCallableStatement>,
        shared: Arc<StatementShared>,
        managed: bool,
    ) -> Self {
        Self {
            core: StatementCore::new(raw, shared, managed),
        }
    }

    fn enter(&mut self) -> Result<MutexGuard<'_, Box<dyn RawCallableStatement>>> {
        self.core.enter()
    }

    fn observe<T>(&self, result: beecp_driver::Result<T>) -> Result<T> {
        self.core.observe(result)
    }

    forward! {
        /// Bind a value to a 1-based parameter index.
        fn bind(&mut self, index: usize, value: Value) -> ();
        /// Clear all bound parameters.
        fn clear_parameters(&mut self) -> ();
        /// Execute as an update.
        fn execute_update(&mut self) -> u64;
        /// Execute; `true` when a result set is available.
        fn execute(&mut self) -> bool;
        /// Bound the execution time of subsequent calls.
        fn set_query_timeout(&mut self, timeout: Duration) -> ();
        /// Read an output parameter after execution.
        fn out_parameter(&mut self, index: usize) -> Value;
    }

    /// Execute as a query.
    pub fn execute_query(&mut self) -> Result<ResultSetProxy> {
        let result = self.enter()?.execute_query();
        let raw = self.observe(result)?;
        Ok(self.core.wrap(raw))
    }

    /// Take the result set produced by the last [`execute`](Self::execute).
    pub fn result_set(&mut self) -> Result<Option<ResultSetProxy>> {
        let result = self.enter()?.result_set();
        let raw = self.observe(result)?;
        Ok(raw.map(|raw| self.core.wrap(raw)))
    }

    /// Whether the connection's statement cache owns the compiled statement.
    #[must_use]
    pub fn is_cache_managed(&self) -> bool {
        self.core.managed
    }

    /// Whether the statement, its connection or the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Close the statement.
    pub fn close(&mut self) -> Result<()> {
        self.core.close()
    }
}
