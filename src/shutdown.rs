//! Process-wide shutdown coordination
//!
//! [`ShutdownFlag`] is the cancellation token every long-lived loop checks
//! once per iteration. It only ever goes from running to stopping. The main
//! thread blocks on it with [`ShutdownFlag::wait`] instead of polling.
//!
//! Unblocking a thread parked in a blocking receive is a separate concern,
//! handled by [`crate::streaming::ReceiveCloser`].

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// One-way run/stop flag shared by all threads
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    stopping: AtomicBool,
    lock: Mutex<()>,
    changed: Condvar,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    ///
    /// Safe to call any number of times from any thread. Returns `true` only
    /// for the call that performed the run→stop transition.
    pub fn signal_stop(&self) -> bool {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Take the lock so a waiter between its check and its park cannot
        // miss the notification.
        let _guard = self.lock.lock();
        self.changed.notify_all();
        true
    }

    /// Whether shutdown has been requested
    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Block until shutdown is requested
    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while !self.is_stopping() {
            self.changed.wait(&mut guard);
        }
    }

    /// Block until shutdown is requested or `timeout` elapses
    ///
    /// Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_stopping() {
            if self.changed.wait_until(&mut guard, deadline).timed_out() {
                return self.is_stopping();
            }
        }
        true
    }
}
