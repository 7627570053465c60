use std::sync::Weak;

use beecp_driver::{DriverError, RawResultSet, Value};

use super::StatementShared;
use crate::error::{PoolError, Result};

/// A cursor produced by a statement proxy.
///
/// The back-reference to the statement is weak: the result set never keeps
/// its statement alive, and fails once that statement is closed.
pub struct ResultSetProxy {
    raw: Option<Box<dyn RawResultSet>>,
    statement: Weak<StatementShared>,
}

impl ResultSetProxy {
    pub(crate) fn new(raw: Box<dyn RawResultSet>, statement: Weak<StatementShared>) -> Self {
        Self {
            raw: Some(raw),
            statement,
        }
    }

    fn enter(&mut self) -> Result<&mut dyn RawResultSet> {
        let Some(raw) = self.raw.as_deref_mut() else {
            return Err(PoolError::ClosedResource("result set"));
        };
        let statement = self
            .statement
            .upgrade()
            .ok_or(PoolError::ClosedResource("statement"))?;
        statement.check()?;
        Ok(raw)
    }

    fn observe<T>(&self, result: beecp_driver::Result<T>) -> Result<T> {
        result.map_err(|e| {
            if e.is_connection_fatal() {
                if let Some(statement) = self.statement.upgrade() {
                    statement.lease.conn.mark_broken();
                }
            }
            PoolError::Driver(e)
        })
    }

    /// Advance to the next row; `false` once exhausted.
    pub fn next(&mut self) -> Result<bool> {
        let result = self.enter()?.next();
        self.observe(result)
    }

    /// Read a 1-based column of the current row.
    pub fn get(&mut self, index: usize) -> Result<Value> {
        let result = self.enter()?.get(index);
        self.observe(result)
    }

    /// Read a column of the current row by name.
    pub fn get_by_name(&mut self, name: &str) -> Result<Value> {
        let raw = self.enter()?;
        let result = match raw.column_index(name) {
            Some(index) => raw.get(index),
            None => Err(DriverError::NoSuchColumn(name.to_string())),
        };
        self.observe(result)
    }

    /// Number of columns.
    pub fn column_count(&mut self) -> Result<usize> {
        Ok(self.enter()?.column_count())
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.raw.is_none()
    }

    /// Release the cursor and drop the statement back-reference.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut raw) = self.raw.take() else {
            return Err(PoolError::ClosedResource("result set"));
        };
        self.statement = Weak::new();
        raw.close().map_err(PoolError::Driver)
    }
}

impl Drop for ResultSetProxy {
    fn drop(&mut self) {
        if let Some(mut raw) = self.raw.take() {
            if let Err(e) = raw.close() {
                tracing::debug!(error = %e, "error closing dropped result set");
            }
        }
    }
}

impl std::fmt::Debug for ResultSetProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSetProxy")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
