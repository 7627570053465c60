//! Borrower arbitration when no connection is immediately available.
//!
//! A borrower that finds the pool exhausted parks a [`Borrower`] record in
//! the pool's [`WaitStrategy`]. Two strategies exist:
//!
//! - [`FairWait`] keeps borrowers in a FIFO queue. A released connection is
//!   transferred straight into the head borrower's slot, so later arrivals
//!   cannot overtake it.
//! - [`UnfairWait`] wakes every waiter when a connection is published idle;
//!   they race to claim it with a compare-and-swap and losers keep waiting.
//!
//! Lock order is always queue first, then borrower slot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::connection::{ConnectionState, PooledConnection};

enum Slot {
    Waiting,
    Transferred(Arc<PooledConnection>),
    Signaled,
    TimedOut,
    Closed,
}

/// How a parked borrower was released.
#[derive(Debug)]
pub(crate) enum WaitOutcome {
    /// A connection was handed over directly, already in `Using` state.
    Transferred(Arc<PooledConnection>),
    /// A connection was published idle; try to claim it.
    Signaled,
    /// The deadline passed without a handoff.
    TimedOut,
    /// The pool shut down.
    Closed,
}

/// A pending request for a connection.
pub(crate) struct Borrower {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Borrower {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Waiting),
            ready: Condvar::new(),
        })
    }

    /// Block until released or until `deadline`.
    ///
    /// A timed-out borrower's slot stays `TimedOut`, so any handoff racing
    /// with the timeout is refused and redirected by the strategy.
    pub(crate) fn wait_until(&self, deadline: Instant) -> WaitOutcome {
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Waiting) {
                Slot::Transferred(conn) => {
                    *slot = Slot::TimedOut;
                    return WaitOutcome::Transferred(conn);
                }
                Slot::Signaled => return WaitOutcome::Signaled,
                Slot::Closed => {
                    *slot = Slot::Closed;
                    return WaitOutcome::Closed;
                }
                Slot::TimedOut => {
                    *slot = Slot::TimedOut;
                    return WaitOutcome::TimedOut;
                }
                Slot::Waiting => {}
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return match std::mem::replace(&mut *slot, Slot::TimedOut) {
                    Slot::Transferred(conn) => WaitOutcome::Transferred(conn),
                    Slot::Closed => {
                        *slot = Slot::Closed;
                        WaitOutcome::Closed
                    }
                    _ => WaitOutcome::TimedOut,
                };
            }
        }
    }

    /// Stop accepting handoffs, returning a connection that arrived anyway.
    pub(crate) fn abandon(&self) -> Option<Arc<PooledConnection>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::TimedOut) {
            Slot::Transferred(conn) => Some(conn),
            Slot::Closed => {
                *slot = Slot::Closed;
                None
            }
            _ => None,
        }
    }

    /// Fill the slot if the borrower is still waiting; hands `conn` back otherwise.
    fn transfer(&self, conn: Arc<PooledConnection>) -> Result<(), Arc<PooledConnection>> {
        let mut slot = self.slot.lock();
        match *slot {
            Slot::Waiting | Slot::Signaled => {
                *slot = Slot::Transferred(conn);
                self.ready.notify_one();
                Ok(())
            }
            _ => Err(conn),
        }
    }

    fn signal(&self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Waiting) {
            *slot = Slot::Signaled;
            self.ready.notify_one();
        }
    }

    fn close(&self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Waiting | Slot::Signaled) {
            *slot = Slot::Closed;
            self.ready.notify_one();
        }
    }
}

/// Arbitration between borrowers waiting on an exhausted pool.
pub(crate) trait WaitStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Park a borrower.
    fn enqueue(&self, borrower: &Arc<Borrower>);

    /// Offer a released connection (in `Using` state) to a waiter.
    ///
    /// Returns the connection when no waiter took it.
    fn handoff(&self, conn: Arc<PooledConnection>) -> Option<Arc<PooledConnection>>;

    /// `conn` has just been published in `Idle` state.
    fn idle_published(&self, conn: &Arc<PooledConnection>);

    /// Whether `borrower` may claim an idle connection or open a new one
    /// itself. `None` asks for a borrower that has not queued yet.
    fn may_acquire(&self, borrower: Option<&Arc<Borrower>>) -> bool;

    /// Remove a borrower that is no longer waiting.
    fn cancel(&self, borrower: &Arc<Borrower>);

    /// Release every waiter with [`WaitOutcome::Closed`].
    fn close_all(&self);

    /// Number of parked borrowers.
    fn waiting(&self) -> usize;
}

/// Pick the strategy for the configured mode.
pub(crate) fn strategy(fair: bool) -> Box<dyn WaitStrategy> {
    if fair {
        Box::new(FairWait::default())
    } else {
        Box::new(UnfairWait::default())
    }
}

/// FIFO handoff.
#[derive(Default)]
pub(crate) struct FairWait {
    queue: Mutex<VecDeque<Arc<Borrower>>>,
}

impl WaitStrategy for FairWait {
    fn name(&self) -> &'static str {
        "fair"
    }

    fn enqueue(&self, borrower: &Arc<Borrower>) {
        self.queue.lock().push_back(Arc::clone(borrower));
    }

    fn handoff(&self, mut conn: Arc<PooledConnection>) -> Option<Arc<PooledConnection>> {
        loop {
            let Some(head) = self.queue.lock().pop_front() else {
                return Some(conn);
            };
            match head.transfer(conn) {
                Ok(()) => return None,
                // head gave up between its timeout and its cancel
                Err(refused) => conn = refused,
            }
        }
    }

    fn idle_published(&self, conn: &Arc<PooledConnection>) {
        // a borrower may have queued after handoff saw an empty queue
        while self.waiting() > 0 && conn.transition(ConnectionState::Idle, ConnectionState::Using) {
            match self.handoff(Arc::clone(conn)) {
                None => return,
                Some(unclaimed) => unclaimed.set_state(ConnectionState::Idle),
            }
        }
    }

    fn may_acquire(&self, borrower: Option<&Arc<Borrower>>) -> bool {
        let queue = self.queue.lock();
        match (queue.front(), borrower) {
            (None, _) => true,
            (Some(head), Some(borrower)) => Arc::ptr_eq(head, borrower),
            // newcomers queue behind earlier arrivals
            (Some(_), None) => false,
        }
    }

    fn cancel(&self, borrower: &Arc<Borrower>) {
        let mut queue = self.queue.lock();
        let was_head = queue.front().is_some_and(|head| Arc::ptr_eq(head, borrower));
        queue.retain(|b| !Arc::ptr_eq(b, borrower));
        // the new head may now take a free slot itself
        if was_head {
            if let Some(head) = queue.front() {
                head.signal();
            }
        }
    }

    fn close_all(&self) {
        for borrower in self.queue.lock().drain(..) {
            borrower.close();
        }
    }

    fn waiting(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Wake everyone and let them race.
#[derive(Default)]
pub(crate) struct UnfairWait {
    waiters: Mutex<Vec<Arc<Borrower>>>,
}

impl WaitStrategy for UnfairWait {
    fn name(&self) -> &'static str {
        "unfair"
    }

    fn enqueue(&self, borrower: &Arc<Borrower>) {
        self.waiters.lock().push(Arc::clone(borrower));
    }

    fn handoff(&self, conn: Arc<PooledConnection>) -> Option<Arc<PooledConnection>> {
        Some(conn)
    }

    fn idle_published(&self, _conn: &Arc<PooledConnection>) {
        for borrower in self.waiters.lock().iter() {
            borrower.signal();
        }
    }

    fn may_acquire(&self, _borrower: Option<&Arc<Borrower>>) -> bool {
        true
    }

    fn cancel(&self, borrower: &Arc<Borrower>) {
        self.waiters.lock().retain(|b| !Arc::ptr_eq(b, borrower));
    }

    fn close_all(&self) {
        for borrower in self.waiters.lock().drain(..) {
            borrower.close();
        }
    }

    fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }
}
