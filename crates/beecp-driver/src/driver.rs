//! Driver capability traits.
//!
//! Every raw handle is owned by exactly one holder at a time and is `Send`
//! so that ownership can move between borrower threads through the pool.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::options::StatementOptions;
use crate::value::Value;

/// Connection properties passed to [`Driver::connect`] (`user`, `password`
/// and any driver specific keys).
pub type Properties = BTreeMap<String, String>;

/// A database driver able to open raw connections.
pub trait Driver: Send + Sync {
    /// Human readable driver name.
    fn name(&self) -> &str;

    /// Whether this driver understands the given connection URL.
    fn accepts_url(&self, url: &str) -> bool;

    /// Open a new raw connection.
    fn connect(&self, url: &str, properties: &Properties) -> Result<Box<dyn RawConnection>>;
}

/// A physical connection to the database.
pub trait RawConnection: Send {
    /// Create a plain statement.
    fn create_statement(&mut self, options: &StatementOptions) -> Result<Box<dyn RawStatement>>;

    /// Compile a parameterized statement.
    fn prepare(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn RawPreparedStatement>>;

    /// Compile a stored procedure call.
    fn prepare_call(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn RawCallableStatement>>;

    /// Execute SQL bounded by `timeout`.
    ///
    /// Returns `true` when the statement produced a result set. The pool uses
    /// this for validation queries.
    fn execute(&mut self, sql: &str, timeout: Duration) -> Result<bool>;

    /// Current auto-commit mode.
    fn auto_commit(&self) -> Result<bool>;

    /// Switch auto-commit mode.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Close the physical connection.
    fn close(&mut self) -> Result<()>;
}

/// A plain statement executing ad-hoc SQL.
pub trait RawStatement: Send {
    /// Execute a query returning rows.
    fn execute_query(&mut self, sql: &str) -> Result<Box<dyn RawResultSet>>;

    /// Execute DML/DDL returning the affected row count.
    fn execute_update(&mut self, sql: &str) -> Result<u64>;

    /// Execute arbitrary SQL; `true` when a result set is available.
    fn execute(&mut self, sql: &str) -> Result<bool>;

    /// Take the result set produced by the last [`execute`](Self::execute).
    fn result_set(&mut self) -> Result<Option<Box<dyn RawResultSet>>>;

    /// Bound the execution time of subsequent calls.
    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Release the statement.
    fn close(&mut self) -> Result<()>;
}

/// A compiled, parameterized statement.
pub trait RawPreparedStatement: Send {
    /// Bind a value to a 1-based parameter index.
    fn bind(&mut self, index: usize, value: Value) -> Result<()>;

    /// Clear all bound parameters.
    fn clear_parameters(&mut self) -> Result<()>;

    /// Execute the statement as a query.
    fn execute_query(&mut self) -> Result<Box<dyn RawResultSet>>;

    /// Execute the statement as an update.
    fn execute_update(&mut self) -> Result<u64>;

    /// Execute the statement; `true` when a result set is available.
    fn execute(&mut self) -> Result<bool>;

    /// Take the result set produced by the last [`execute`](Self::execute).
    fn result_set(&mut self) -> Result<Option<Box<dyn RawResultSet>>>;

    /// Bound the execution time of subsequent calls.
    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Release the statement at the driver level.
    fn close(&mut self) -> Result<()>;
}

/// A compiled stored procedure call.
pub trait RawCallableStatement: RawPreparedStatement {
    /// Read an output parameter after execution.
    fn out_parameter(&mut self, index: usize) -> Result<Value>;
}

/// A cursor over rows.
pub trait RawResultSet: Send {
    /// Advance to the next row; `false` once exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Read a 1-based column of the current row.
    fn get(&self, index: usize) -> Result<Value>;

    /// Number of columns.
    fn column_count(&self) -> usize;

    /// 1-based index of a named column.
    fn column_index(&self, name: &str) -> Option<usize>;

    /// Release the cursor.
    fn close(&mut self) -> Result<()>;
}
