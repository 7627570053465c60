//! Mock driver implementation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use beecp_driver::{
    Driver, DriverError, Properties, RawCallableStatement, RawConnection, RawPreparedStatement,
    RawResultSet, RawStatement, Result, StatementOptions, Value,
};
use parking_lot::Mutex;

/// Name the mock driver is registered under.
pub const MOCK_DRIVER_NAME: &str = "beecp.testing.MockDriver";

/// URL accepted by the mock driver.
pub const MOCK_URL: &str = "mock://localhost/test";

/// Shared, scriptable state behind every handle of a [`MockDriver`].
#[derive(Debug, Default)]
pub struct MockState {
    next_id: AtomicU64,
    connects: AtomicUsize,
    connection_closes: AtomicUsize,
    statements_created: AtomicUsize,
    prepares: AtomicUsize,
    prepare_calls: AtomicUsize,
    statement_closes: AtomicUsize,
    result_set_closes: AtomicUsize,
    validations: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_connect: AtomicBool,
    fail_validation: AtomicBool,
    validation_delay_ms: AtomicU64,
    ignore_timeout: AtomicBool,
    /// Connections created at or before this generation are broken.
    broken_generation: AtomicU64,
    last_properties: Mutex<Properties>,
}

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> usize {
                self.$name.load(Ordering::SeqCst)
            }
        )*
    };
}

impl MockState {
    counters! {
        /// Raw connections opened.
        connects,
        /// Raw connections closed.
        connection_closes,
        /// Plain statements created.
        statements_created,
        /// Prepared statements compiled.
        prepares,
        /// Callable statements compiled.
        prepare_calls,
        /// Prepared/callable/plain statements closed at the driver level.
        statement_closes,
        /// Result sets closed.
        result_set_closes,
        /// Validation queries executed.
        validations,
        /// Rollbacks executed.
        rollbacks,
    }

    /// Raw connections currently open.
    pub fn open_connections(&self) -> usize {
        self.connects() - self.connection_closes()
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent validation queries fail.
    pub fn set_fail_validation(&self, fail: bool) {
        self.fail_validation.store(fail, Ordering::SeqCst);
    }

    /// Delay every validation query; delays past the caller's timeout fail.
    pub fn set_validation_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.validation_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Make validation run its full delay and succeed, whatever the timeout.
    pub fn set_ignore_timeout(&self, ignore: bool) {
        self.ignore_timeout.store(ignore, Ordering::SeqCst);
    }

    /// Break every connection opened so far; later connections are healthy.
    pub fn break_existing_connections(&self) {
        let current = self.next_id.load(Ordering::SeqCst);
        self.broken_generation.store(current, Ordering::SeqCst);
    }

    /// Properties passed to the most recent `connect`.
    pub fn last_properties(&self) -> Properties {
        self.last_properties.lock().clone()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_broken(&self, connection_id: u64) -> bool {
        connection_id <= self.broken_generation.load(Ordering::SeqCst)
    }
}

/// In-memory driver accepting `mock://` URLs.
#[derive(Debug, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a driver with fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state handle for scripting and assertions.
    #[must_use]
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        MOCK_DRIVER_NAME
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("mock://")
    }

    fn connect(&self, url: &str, properties: &Properties) -> Result<Box<dyn RawConnection>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DriverError::Connect(format!("mock refused connection to {url}")));
        }
        *self.state.last_properties.lock() = properties.clone();
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let id = self.state.allocate_id();
        tracing::trace!(connection_id = id, "mock connection opened");
        Ok(Box::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
            auto_commit: true,
            closed: false,
        }))
    }
}

struct MockConnection {
    id: u64,
    state: Arc<MockState>,
    auto_commit: bool,
    closed: bool,
}

impl MockConnection {
    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        if self.state.is_broken(self.id) {
            return Err(DriverError::ConnectionLost(format!(
                "mock connection {} was reset",
                self.id
            )));
        }
        Ok(())
    }
}

impl RawConnection for MockConnection {
    fn create_statement(&mut self, _options: &StatementOptions) -> Result<Box<dyn RawStatement>> {
        self.check()?;
        self.state.statements_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement::new(&self.state, String::new())))
    }

    fn prepare(
        &mut self,
        sql: &str,
        _options: &StatementOptions,
    ) -> Result<Box<dyn RawPreparedStatement>> {
        self.check()?;
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement::new(&self.state, sql.to_string())))
    }

    fn prepare_call(
        &mut self,
        sql: &str,
        _options: &StatementOptions,
    ) -> Result<Box<dyn RawCallableStatement>> {
        self.check()?;
        self.state.prepare_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement::new(&self.state, sql.to_string())))
    }

    fn execute(&mut self, _sql: &str, timeout: Duration) -> Result<bool> {
        self.check()?;
        self.state.validations.fetch_add(1, Ordering::SeqCst);
        let delay = Duration::from_millis(self.state.validation_delay_ms.load(Ordering::SeqCst));
        if delay > timeout && !self.state.ignore_timeout.load(Ordering::SeqCst) {
            std::thread::sleep(timeout);
            return Err(DriverError::Timeout(timeout));
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.state.fail_validation.load(Ordering::SeqCst) {
            return Err(DriverError::sql("08003", "mock validation failure"));
        }
        Ok(true)
    }

    fn auto_commit(&self) -> Result<bool> {
        self.check()?;
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.check()?;
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check()
    }

    fn rollback(&mut self) -> Result<()> {
        self.check()?;
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.closed = true;
        self.state.connection_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Serves as plain, prepared and callable statement alike.
struct MockStatement {
    id: u64,
    sql: String,
    params: BTreeMap<usize, Value>,
    pending: Option<MockResultSet>,
    state: Arc<MockState>,
    closed: bool,
}

impl MockStatement {
    fn new(state: &Arc<MockState>, sql: String) -> Self {
        Self {
            id: state.allocate_id(),
            sql,
            params: BTreeMap::new(),
            pending: None,
            state: Arc::clone(state),
            closed: false,
        }
    }

    fn check(&self) -> Result<()> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn run(&self, sql: &str) -> MockResultSet {
        let mut row = vec![Value::Int(self.id as i64), Value::Text(sql.to_string())];
        let mut columns = vec!["statement_id".to_string(), "sql".to_string()];
        for (index, value) in &self.params {
            columns.push(format!("p{index}"));
            row.push(value.clone());
        }
        MockResultSet {
            columns,
            rows: vec![row],
            cursor: None,
            state: Arc::clone(&self.state),
        }
    }
}

impl RawStatement for MockStatement {
    fn execute_query(&mut self, sql: &str) -> Result<Box<dyn RawResultSet>> {
        self.check()?;
        Ok(Box::new(self.run(sql)))
    }

    fn execute_update(&mut self, _sql: &str) -> Result<u64> {
        self.check()?;
        Ok(1)
    }

    fn execute(&mut self, sql: &str) -> Result<bool> {
        self.check()?;
        self.pending = Some(self.run(sql));
        Ok(true)
    }

    fn result_set(&mut self) -> Result<Option<Box<dyn RawResultSet>>> {
        self.check()?;
        Ok(self
            .pending
            .take()
            .map(|rs| Box::new(rs) as Box<dyn RawResultSet>))
    }

    fn set_query_timeout(&mut self, _timeout: Duration) -> Result<()> {
        self.check()
    }

    fn close(&mut self) -> Result<()> {
        self.check()?;
        self.closed = true;
        self.state.statement_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RawPreparedStatement for MockStatement {
    fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        self.check()?;
        if index == 0 {
            return Err(DriverError::InvalidParameter(index));
        }
        self.params.insert(index, value);
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<()> {
        self.check()?;
        self.params.clear();
        Ok(())
    }

    fn execute_query(&mut self) -> Result<Box<dyn RawResultSet>> {
        self.check()?;
        let sql = self.sql.clone();
        Ok(Box::new(self.run(&sql)))
    }

    fn execute_update(&mut self) -> Result<u64> {
        self.check()?;
        Ok(1)
    }

    fn execute(&mut self) -> Result<bool> {
        self.check()?;
        let sql = self.sql.clone();
        self.pending = Some(self.run(&sql));
        Ok(true)
    }

    fn result_set(&mut self) -> Result<Option<Box<dyn RawResultSet>>> {
        RawStatement::result_set(self)
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()> {
        RawStatement::set_query_timeout(self, timeout)
    }

    fn close(&mut self) -> Result<()> {
        RawStatement::close(self)
    }
}

impl RawCallableStatement for MockStatement {
    fn out_parameter(&mut self, index: usize) -> Result<Value> {
        self.check()?;
        self.params
            .get(&index)
            .cloned()
            .ok_or(DriverError::InvalidParameter(index))
    }
}

struct MockResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
    state: Arc<MockState>,
}

impl RawResultSet for MockResultSet {
    fn next(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next);
        Ok(next < self.rows.len())
    }

    fn get(&self, index: usize) -> Result<Value> {
        let row = self
            .cursor
            .and_then(|c| self.rows.get(c))
            .ok_or_else(|| DriverError::sql("24000", "cursor is not on a row"))?;
        index
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .cloned()
            .ok_or_else(|| DriverError::NoSuchColumn(index.to_string()))
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .map(|i| i + 1)
    }

    fn close(&mut self) -> Result<()> {
        self.state.result_set_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_validate() {
        let driver = MockDriver::new();
        let state = driver.state();
        let mut conn = driver.connect(MOCK_URL, &Properties::new()).unwrap();
        assert!(conn.execute("select 1", Duration::from_secs(1)).unwrap());
        assert_eq!(state.connects(), 1);
        assert_eq!(state.validations(), 1);
        conn.close().unwrap();
        assert_eq!(state.open_connections(), 0);
    }

    #[test]
    fn test_validation_delay_past_timeout() {
        let driver = MockDriver::new();
        driver.state().set_validation_delay(Duration::from_millis(200));
        let mut conn = driver.connect(MOCK_URL, &Properties::new()).unwrap();
        let err = conn
            .execute("select 1", Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
    }

    #[test]
    fn test_broken_connections() {
        let driver = MockDriver::new();
        let mut old = driver.connect(MOCK_URL, &Properties::new()).unwrap();
        driver.state().break_existing_connections();
        let mut fresh = driver.connect(MOCK_URL, &Properties::new()).unwrap();

        assert!(old.commit().unwrap_err().is_connection_fatal());
        assert!(fresh.commit().is_ok());
    }

    #[test]
    fn test_query_reports_statement_id() {
        let driver = MockDriver::new();
        let mut conn = driver.connect(MOCK_URL, &Properties::new()).unwrap();
        let mut stmt = conn.prepare("select ?", &StatementOptions::new()).unwrap();
        stmt.bind(1, Value::from(42)).unwrap();
        let mut rs = stmt.execute_query().unwrap();
        assert!(rs.next().unwrap());
        assert!(rs.get(1).unwrap().as_i64().is_some());
        assert_eq!(rs.get(3).unwrap(), Value::Int(42));
        assert_eq!(rs.column_index("p1"), Some(3));
        assert!(!rs.next().unwrap());
    }
}
