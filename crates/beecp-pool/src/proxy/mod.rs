//! Lifecycle-safe wrappers around driver objects.
//!
//! Every handle the pool gives out is a proxy. A proxy call first checks that
//! the proxy is open (else [`PoolError::ClosedResource`]) and that the pool is
//! open (else [`PoolError::PoolClosed`]), then refreshes the owning
//! connection's activity time and forwards to the driver. A driver failure
//! that leaves the connection unusable marks it broken, so the pool discards
//! it on return instead of lending it out again.
//!
//! | proxy | wraps | intercepts |
//! |---|---|---|
//! | [`ConnectionProxy`] | pooled connection | statement creation, `close` returns to pool |
//! | [`StatementProxy`] | `RawStatement` | result sets |
//! | [`PreparedStatementProxy`] | `RawPreparedStatement` | result sets, `close` clears parameters of a cached statement |
//! | [`CallableStatementProxy`] | `RawCallableStatement` | result sets, `close` clears parameters of a cached statement |
//! | [`ResultSetProxy`] | `RawResultSet` | `close` |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::{PhysicalGuard, PooledConnection};
use crate::error::{PoolError, Result};
use crate::pool::PoolInner;

/// Generate methods that check the proxy, forward to the raw handle returned
/// by `self.enter()` and pass the result through `self.observe()`.
macro_rules! forward {
    ($(
        $(#[$meta:meta])*
        fn $name:ident(&mut self $(, $arg:ident: $ty:ty)*) -> $ret:ty;
    )*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self $(, $arg: $ty)*) -> $crate::error::Result<$ret> {
                let result = self.enter()?.$name($($arg),*);
                self.observe(result)
            }
        )*
    };
}

mod connection;
mod result_set;
mod statement;

pub use connection::ConnectionProxy;
pub use result_set::ResultSetProxy;
pub use statement::{CallableStatementProxy, PreparedStatementProxy, StatementProxy};

/// One borrow of a pooled connection, shared by its connection proxy and
/// every statement created through it.
pub(crate) struct Lease {
    pool: Arc<PoolInner>,
    conn: Arc<PooledConnection>,
    closed: AtomicBool,
}

impl Lease {
    fn new(pool: Arc<PoolInner>, conn: Arc<PooledConnection>) -> Self {
        Self {
            pool,
            conn,
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.pool.is_closed()
    }

    /// Reject calls after close or shutdown; record activity otherwise.
    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::ClosedResource("connection"));
        }
        if self.pool.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        self.conn.touch();
        Ok(())
    }

    fn physical(&self) -> Result<PhysicalGuard<'_>> {
        self.check()?;
        self.conn.physical()
    }

    fn observe<T>(&self, result: beecp_driver::Result<T>) -> Result<T> {
        result.map_err(|e| {
            if e.is_connection_fatal() {
                self.conn.mark_broken();
            }
            PoolError::Driver(e)
        })
    }

    /// Give the connection back to the pool; `false` if already released.
    fn release(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.pool.recycle(Arc::clone(&self.conn));
        true
    }
}

/// State shared between a statement proxy and the result sets it produced.
pub(crate) struct StatementShared {
    closed: AtomicBool,
    lease: Arc<Lease>,
}

impl StatementShared {
    fn new(lease: Arc<Lease>) -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            lease,
        })
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::ClosedResource("statement"));
        }
        self.lease.check()
    }
}
