//! Cross-thread signals used by the queues and pools.
//!
//! [`ResetEvent`] is a manual-reset binary signal; [`Semaphore`] is a counting
//! signal with a fixed maximum. Both support bounded waits so callers can
//! periodically re-check shutdown flags instead of blocking forever.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Instant `timeout` from now, or `None` when that is past what `Instant`
/// can represent (treated as no deadline)
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Contract for a cross-thread wait signal
pub trait WaitHandle: Send + Sync {
    /// Block until the signal is available
    fn wait_one(&self);

    /// Block for at most `timeout`. Returns true if the signal was taken.
    fn wait_timeout(&self, timeout: Duration) -> bool;

    /// Signal, releasing waiting threads
    fn set(&self);

    /// True if `wait_one` would return immediately
    fn is_set(&self) -> bool;
}

/// Manual-reset event: stays signalled until [`reset`](ResetEvent::reset)
#[derive(Debug, Default)]
pub struct ResetEvent {
    signalled: Mutex<bool>,
    changed: Condvar,
}

impl ResetEvent {
    pub fn new(initially_set: bool) -> Self {
        Self {
            signalled: Mutex::new(initially_set),
            changed: Condvar::new(),
        }
    }

    /// Clear the signal so later waits block
    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }
}

impl WaitHandle for ResetEvent {
    fn wait_one(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.changed.wait(&mut signalled);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = deadline_after(timeout) else {
            self.wait_one();
            return true;
        };
        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.changed.wait_until(&mut signalled, deadline).timed_out() {
                return *signalled;
            }
        }
        true
    }

    fn set(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.changed.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.signalled.lock()
    }
}

/// Counting semaphore with a fixed number of permits
#[derive(Debug)]
pub struct Semaphore {
    available: Mutex<usize>,
    released: Condvar,
    max: usize,
}

impl Semaphore {
    pub fn new(initial: usize, max: usize) -> Self {
        Self {
            available: Mutex::new(initial.min(max)),
            released: Condvar::new(),
            max,
        }
    }

    /// Take a permit, blocking while none are available
    pub fn acquire(&self) {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
    }

    /// Take a permit if one frees up within `timeout`
    pub fn try_acquire_for(&self, timeout: Duration) -> bool {
        let Some(deadline) = deadline_after(timeout) else {
            self.acquire();
            return true;
        };
        let mut available = self.available.lock();
        while *available == 0 {
            if self.released.wait_until(&mut available, deadline).timed_out() && *available == 0 {
                return false;
            }
        }
        *available -= 1;
        true
    }

    /// Return a permit
    pub fn release(&self) {
        let mut available = self.available.lock();
        if *available >= self.max {
            warn!(max = self.max, "Semaphore released above its maximum; ignoring");
            return;
        }
        *available += 1;
        self.released.notify_one();
    }

    /// Permits currently available
    pub fn available_permits(&self) -> usize {
        *self.available.lock()
    }
}

impl WaitHandle for Semaphore {
    fn wait_one(&self) {
        self.acquire();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        self.try_acquire_for(timeout)
    }

    fn set(&self) {
        self.release();
    }

    /// True while at least one permit is held, i.e. a `set` would not overflow
    fn is_set(&self) -> bool {
        self.available_permits() < self.max
    }
}
