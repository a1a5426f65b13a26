//! Streaming recipient registration
//!
//! Holds the address of the last client that asked for samples. Written by
//! the command listener, read by the streamer once per sample. The address
//! and port are stored as one [`SocketAddr`] under a short critical section,
//! so a reader always sees a complete registration. The lock is only held to
//! copy the value; never across socket I/O.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Single-recipient registry (last writer wins, never cleared)
#[derive(Debug, Default)]
pub struct RecipientRegistry {
    recipient: Mutex<Option<SocketAddr>>,
    generation: AtomicU64,
}

impl RecipientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current recipient, returning the previous one
    pub fn register(&self, addr: SocketAddr) -> Option<SocketAddr> {
        let previous = self.recipient.lock().replace(addr);
        self.generation.fetch_add(1, Ordering::Release);
        previous
    }

    /// Snapshot of the current recipient
    #[inline]
    pub fn current(&self) -> Option<SocketAddr> {
        *self.recipient.lock()
    }

    /// Whether any client has registered
    pub fn is_registered(&self) -> bool {
        self.current().is_some()
    }

    /// Number of registrations so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
