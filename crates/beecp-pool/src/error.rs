//! Pool error types.

use std::time::Duration;

use beecp_driver::DriverError;
use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors surfaced by the connection pool and its proxies.
///
/// Only [`Config`](Self::Config) and [`DriverLoad`](Self::DriverLoad) are
/// fatal to pool startup; everything else fails the current call only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// No driver could be resolved for the configured name/URL.
    #[error("driver load error: {0}")]
    DriverLoad(#[source] DriverError),

    /// A new raw connection could not be established.
    #[error("failed to create connection: {0}")]
    ConnectionCreate(#[source] DriverError),

    /// No connection became available within the borrower wait time.
    #[error("timed out after {0:?} waiting for a connection")]
    BorrowTimeout(Duration),

    /// A validation query failed; the connection was discarded.
    #[error("connection validation failed: {0}")]
    Validation(#[source] DriverError),

    /// A proxy was used after it was closed.
    #[error("{0} has been closed")]
    ClosedResource(&'static str),

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A proxied driver call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Misuse of the pool directory.
    #[error("naming error: {0}")]
    Naming(String),

    /// The idle scanner thread could not be spawned.
    #[error("failed to start idle scanner: {0}")]
    Scanner(#[source] std::io::Error),
}

impl PoolError {
    /// Whether the failure was a borrow timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::BorrowTimeout(_))
    }

    /// Whether the failure was use of a closed proxy.
    #[must_use]
    pub fn is_closed_resource(&self) -> bool {
        matches!(self, Self::ClosedResource(_))
    }
}
