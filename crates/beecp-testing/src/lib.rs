//! # beecp-testing
//!
//! Test infrastructure for the beecp connection pool.
//!
//! [`MockDriver`] is an in-memory driver whose behavior can be scripted
//! through its shared [`MockState`]: connection failures, validation
//! failures and latency, and broken connections. Every raw handle reports to
//! the state so tests can assert how often the pool really connected,
//! prepared or closed something.
//!
//! Query results are synthetic: each query yields one row whose first
//! column is the id of the statement that ran it, followed by the SQL text
//! and any bound parameters. That makes it possible to tell whether two
//! statement proxies share one compiled statement.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MOCK_DRIVER_NAME, MOCK_URL, MockDriver, MockState};

use std::sync::Arc;

use beecp_driver::DriverRegistry;

/// A registry containing a single mock driver, plus its state handle.
#[must_use]
pub fn mock_registry() -> (DriverRegistry, Arc<MockState>) {
    let driver = MockDriver::new();
    let state = driver.state();
    let registry = DriverRegistry::new().with_driver(MOCK_DRIVER_NAME, Arc::new(driver));
    (registry, state)
}
