//! # beecp-driver
//!
//! Driver capability layer for the beecp connection pool.
//!
//! The pool never speaks a wire protocol itself. Everything it needs from a
//! backing database is expressed through the traits in this crate:
//!
//! - [`Driver`] opens raw connections for a URL and a set of [`Properties`]
//! - [`RawConnection`] creates statements and runs validation queries
//! - [`RawStatement`], [`RawPreparedStatement`] and [`RawCallableStatement`]
//!   execute SQL and hand back [`RawResultSet`]s
//!
//! Drivers are published through an explicit [`DriverRegistry`] that is built
//! once at startup and passed to the pool by reference.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use beecp_driver::DriverRegistry;
//!
//! let mut registry = DriverRegistry::new();
//! registry.register("org.example.Driver", Arc::new(MyDriver::default()));
//!
//! let driver = registry.resolve("org.example.Driver", "example://db")?;
//! let conn = driver.connect("example://db", &Default::default())?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod driver;
pub mod error;
pub mod options;
pub mod registry;
pub mod value;

pub use driver::{
    Driver, Properties, RawCallableStatement, RawConnection, RawPreparedStatement, RawResultSet,
    RawStatement,
};
pub use error::{DriverError, Result};
pub use options::{Concurrency, GeneratedKeys, ResultSetType, StatementOptions};
pub use registry::DriverRegistry;
pub use value::Value;
