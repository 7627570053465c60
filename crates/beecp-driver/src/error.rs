//! Driver-level error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors reported by a backing database driver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The driver could not establish a connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// An established connection was lost or became unusable.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The database rejected a statement.
    #[error("SQL error [{state}]: {message}")]
    Sql {
        /// Five-character SQLSTATE code.
        state: String,
        /// Database supplied message.
        message: String,
    },

    /// An operation did not complete before its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The raw handle was already closed.
    #[error("handle is closed")]
    Closed,

    /// A parameter index was out of range.
    #[error("invalid parameter index: {0}")]
    InvalidParameter(usize),

    /// A column was requested that the result set does not have.
    #[error("no such column: {0}")]
    NoSuchColumn(String),

    /// The driver does not implement the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// No registered driver matched the requested name or URL.
    #[error("no suitable driver for '{name}' (url: {url})")]
    NoSuitableDriver {
        /// Requested driver name.
        name: String,
        /// Requested connection URL.
        url: String,
    },
}

impl DriverError {
    /// Create an SQL error from a SQLSTATE and message.
    pub fn sql(state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sql {
            state: state.into(),
            message: message.into(),
        }
    }

    /// Whether this failure leaves the connection it came from unusable.
    ///
    /// SQLSTATE class `08` is the standard "connection exception" class.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Self::Connect(_) | Self::ConnectionLost(_) | Self::Closed => true,
            Self::Sql { state, .. } => state.starts_with("08"),
            _ => false,
        }
    }
}
