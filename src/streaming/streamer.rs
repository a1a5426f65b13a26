//! Sample emitter used by the sampler thread
//!
//! One best-effort datagram per sample to whoever is registered. Nothing is
//! queued: if nobody is registered, or the outbound socket is absent, the
//! sample is dropped silently. Send failures are logged and swallowed so
//! they can never stall or stop sampling.

use crate::error::{Error, Result};
use crate::streaming::protocol::format_sample;
use crate::streaming::registry::RecipientRegistry;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

/// Typical sample line is 8 bytes ("1.23456\n")
const LINE_CAPACITY: usize = 32;

/// Sends converted samples to the registered recipient
pub struct Streamer {
    socket: Option<UdpSocket>,
    registry: Arc<RecipientRegistry>,
    /// Reused line buffer
    line: String,
    last_target: Option<SocketAddr>,
    /// Consecutive failed sends (for log throttling)
    failure_run: u64,
    sent: u64,
}

impl Streamer {
    /// Streamer sending from `socket` (normally a clone of the listener's)
    pub fn new(socket: UdpSocket, registry: Arc<RecipientRegistry>) -> Self {
        Self::with_socket(Some(socket), registry)
    }

    /// Streamer without an outbound channel; every emit is a no-op
    pub fn detached(registry: Arc<RecipientRegistry>) -> Self {
        Self::with_socket(None, registry)
    }

    fn with_socket(socket: Option<UdpSocket>, registry: Arc<RecipientRegistry>) -> Self {
        Self {
            socket,
            registry,
            line: String::with_capacity(LINE_CAPACITY),
            last_target: None,
            failure_run: 0,
            sent: 0,
        }
    }

    /// Emit one sample to the current recipient, if any
    pub fn emit(&mut self, value: f64) {
        match self.try_emit(value) {
            Ok(_) => {
                if self.failure_run > 0 {
                    log::info!("Sample sends recovered after {} failures", self.failure_run);
                    self.failure_run = 0;
                }
            }
            Err(e) => {
                self.failure_run += 1;
                if self.failure_run == 1 {
                    log::warn!("Failed to send sample: {}", e);
                } else {
                    log::trace!("Failed to send sample: {}", e);
                }
            }
        }
    }

    /// Samples delivered to the socket so far
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    /// Returns `Ok(false)` when there is nothing to send to
    fn try_emit(&mut self, value: f64) -> Result<bool> {
        let Some(socket) = &self.socket else {
            return Ok(false);
        };
        let target = self.registry.current();
        if target != self.last_target {
            if let Some(addr) = target {
                log::info!("Streaming samples to {}", addr);
            }
            self.last_target = target;
        }
        let Some(target) = target else {
            return Ok(false);
        };

        self.line.clear();
        format_sample(value, &mut self.line);
        socket
            .send_to(self.line.as_bytes(), target)
            .map_err(Error::Send)?;

        self.sent += 1;
        log::trace!("Sent {} to {}", self.line.trim_end(), target);
        Ok(true)
    }
}
