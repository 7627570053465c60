//! # beecp-pool
//!
//! Connection pool engine for blocking database drivers.
//!
//! The pool hands out lifecycle-safe proxies over connections opened through
//! a [`beecp_driver::Driver`], and takes them back when the proxy is closed.
//!
//! ## Features
//!
//! - Lock-free claiming of idle connections (atomic state per connection)
//! - Fair (FIFO handoff) or unfair (wake-all race) borrower arbitration
//! - Bounded borrow wait with leak-free cancellation
//! - Validation query on every new connection, bounded by its own timeout
//! - Per-connection LRU prepared statement cache
//! - Background eviction of idle connections and reporting of inactive ones
//! - Rollback of open transactions on return
//! - Status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use beecp_pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new("org.example.Driver", "example://db", "app", "secret")
//!     .pool_init_size(2)
//!     .pool_max_size(20)
//!     .fair_mode(true)
//!     .borrower_max_wait_time(Duration::from_secs(5));
//!
//! let pool = ConnectionPool::initialize(config, &registry)?;
//!
//! let conn = pool.borrow()?;
//! let mut stmt = conn.prepare_statement("select name from users where id = ?")?;
//! stmt.bind(1, 42.into())?;
//! let mut rows = stmt.execute_query()?;
//! while rows.next()? {
//!     println!("{}", rows.get(1)?);
//! }
//! stmt.close()?; // back into the statement cache
//! conn.close()?; // back into the pool
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod naming;
pub mod pool;
pub mod proxy;
pub mod statement_cache;

mod scanner;
mod wait;

// Configuration
pub use config::{CheckedConfig, PoolConfig};

// Error types
pub use error::{PoolError, Result};

// Pool types
pub use connection::{ConnectionState, PooledConnection};
pub use naming::PoolDirectory;
pub use pool::{ConnectionPool, PoolBuilder, PoolMetrics, PoolStatus};

// Proxies
pub use proxy::{
    CallableStatementProxy, ConnectionProxy, PreparedStatementProxy, ResultSetProxy,
    StatementProxy,
};

// Statement caching
pub use statement_cache::{CacheKey, CachedStatement, Shared, StatementCache, StatementKind};
