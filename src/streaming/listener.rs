//! UDP command listener
//!
//! Runs on its own thread, blocked in `recv_from` on the well-known port.
//! Each datagram is parsed as a [`Command`] and answered on the same socket.
//!
//! # State Machine
//!
//! ```text
//! Idle ──spawn──▶ Listening ──stop / close / fatal recv──▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! `Stopped` is published only after every copy of the socket held by the
//! listener and its [`ReceiveCloser`] has been dropped.
//!
//! # Shutdown
//!
//! Two separate mechanisms:
//!
//! - the [`ShutdownFlag`] is checked before every blocking receive;
//! - [`ReceiveCloser::close`] marks the receive side closed and sends an
//!   empty datagram to the listener's own address, so a thread parked in
//!   `recv_from` wakes up and sees the flag.
//!
//! Every receive is also bounded by [`RECV_POLL_INTERVAL`], so a lost wake
//! datagram delays shutdown by at most that long. Closing the receive side
//! while the flag is still clear is a receive failure: the thread exits with
//! [`Error::Receive`] and the sampler keeps going.

use crate::error::{Error, Result};
use crate::shutdown::ShutdownFlag;
use crate::streaming::protocol::Command;
use crate::streaming::registry::RecipientRegistry;
use parking_lot::Mutex;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receive buffer; commands are a few bytes
const RECV_BUFFER_SIZE: usize = 512;

/// Longest a single receive blocks before the loop re-checks its flags
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    Idle = 0,
    Listening = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl ListenerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ListenerState::Idle,
            1 => ListenerState::Listening,
            2 => ListenerState::ShuttingDown,
            _ => ListenerState::Stopped,
        }
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new() -> Self {
        Self(AtomicU8::new(ListenerState::Idle as u8))
    }

    fn set(&self, state: ListenerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> ListenerState {
        ListenerState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Handle that unblocks a thread parked in the listener's receive call
#[derive(Debug)]
pub struct ReceiveCloser {
    /// Send-only copy of the listener socket, `None` once released
    socket: Mutex<Option<UdpSocket>>,
    wake_addr: SocketAddr,
    closed: AtomicBool,
}

impl ReceiveCloser {
    fn new(socket: &UdpSocket) -> Result<Self> {
        let local = socket.local_addr().map_err(Error::Socket)?;
        Ok(Self {
            socket: Mutex::new(Some(socket.try_clone().map_err(Error::Socket)?)),
            wake_addr: wake_address(local),
            closed: AtomicBool::new(false),
        })
    }

    /// Close the receive side of the listener
    ///
    /// Signal the [`ShutdownFlag`] first; closing while it is clear ends the
    /// listener with [`Error::Receive`]. Idempotent, and a no-op once the
    /// listener has exited.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        match self.socket.lock().as_ref() {
            Some(socket) => socket
                .send_to(&[], self.wake_addr)
                .map(|_| ())
                .map_err(Error::Send),
            None => Ok(()),
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop this handle's copy of the socket
    pub fn release(&self) {
        self.socket.lock().take();
    }

    /// Whether this handle still keeps the socket open
    pub fn holds_socket(&self) -> bool {
        self.socket.lock().is_some()
    }
}

/// Loopback address that reaches a socket bound to `local`
fn wake_address(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

/// Bound command socket, ready to be spawned on its own thread
pub struct CommandListener {
    socket: UdpSocket,
    registry: Arc<RecipientRegistry>,
    shutdown: Arc<ShutdownFlag>,
    closer: Arc<ReceiveCloser>,
    state: Arc<SharedState>,
}

impl CommandListener {
    /// Create and bind the listener socket
    ///
    /// Failure is fatal at startup: the listener never reaches `Listening`.
    pub fn bind(
        addr: SocketAddr,
        registry: Arc<RecipientRegistry>,
        shutdown: Arc<ShutdownFlag>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(Error::Socket)?;
        socket
            .set_read_timeout(Some(RECV_POLL_INTERVAL))
            .map_err(Error::Socket)?;
        let closer = Arc::new(ReceiveCloser::new(&socket)?);

        log::info!(
            "UDP command listener bound to {}",
            socket.local_addr().map_err(Error::Socket)?
        );

        Ok(Self {
            socket,
            registry,
            shutdown,
            closer,
            state: Arc::new(SharedState::new()),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Error::Socket)
    }

    /// Clone of the socket for outbound samples
    ///
    /// Samples then arrive from the well-known port the client talks to.
    pub fn outbound_socket(&self) -> Result<UdpSocket> {
        self.socket.try_clone().map_err(Error::Socket)
    }

    /// Unblock handle for the shutdown path
    pub fn closer(&self) -> Arc<ReceiveCloser> {
        Arc::clone(&self.closer)
    }

    pub fn state(&self) -> ListenerState {
        self.state.get()
    }

    /// Start the listener thread
    pub fn spawn(self) -> Result<ListenerHandle> {
        let state = Arc::clone(&self.state);
        let closer = Arc::clone(&self.closer);
        let handle = thread::Builder::new()
            .name("udp-listener".to_string())
            .spawn(move || self.run())
            .map_err(|e| Error::Other(format!("Failed to spawn listener thread: {}", e)))?;

        Ok(ListenerHandle {
            handle: Some(handle),
            state,
            closer,
        })
    }

    /// Receive loop; returns when shutdown is requested or on a fatal error
    ///
    /// The socket is closed before the state becomes `Stopped`.
    pub fn run(self) -> Result<()> {
        self.state.set(ListenerState::Listening);
        log::info!("UDP listener started (commands: send, stop)");

        let result = self.receive_loop();

        self.state.set(ListenerState::ShuttingDown);
        if let Err(ref e) = result {
            log::error!("UDP listener stopped: {}", e);
        } else {
            log::info!("UDP listener stopped");
        }

        let Self {
            socket,
            closer,
            state,
            ..
        } = self;
        drop(socket);
        closer.release();
        state.set(ListenerState::Stopped);
        result
    }

    fn receive_loop(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        while !self.shutdown.is_stopping() {
            if self.closer.is_closed() {
                return Err(Error::Receive(io::Error::new(
                    ErrorKind::NotConnected,
                    "receive side closed while running",
                )));
            }
            match self.socket.recv_from(&mut buffer) {
                Ok((n, from)) => {
                    if self.handle_datagram(&buffer[..n], from) == Command::Stop {
                        if let Err(e) = self.closer.close() {
                            log::warn!("Failed to close receive side: {}", e);
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(_) if self.shutdown.is_stopping() => {
                    log::debug!("Receive unblocked for shutdown");
                }
                Err(e) => return Err(Error::Receive(e)),
            }
        }

        Ok(())
    }

    /// Apply one datagram and send its reply
    ///
    /// Returns the parsed command so the loop can finish a `stop`.
    fn handle_datagram(&self, payload: &[u8], from: SocketAddr) -> Command {
        let (command, reply) = self.dispatch(payload, from);
        if let Some(reply) = reply {
            if let Err(e) = self.socket.send_to(reply.as_bytes(), from) {
                log::warn!("Failed to reply to {}: {}", from, e);
            }
        }
        command
    }

    /// Update shared state for `payload` and return the reply to send
    fn dispatch(&self, payload: &[u8], from: SocketAddr) -> (Command, Option<&'static str>) {
        let command = Command::parse(payload);
        match &command {
            Command::Empty => {}
            Command::Send => match self.registry.register(from) {
                Some(previous) if previous != from => {
                    log::info!("Recipient {} replaced by {}", previous, from);
                }
                Some(_) => log::debug!("Recipient {} re-registered", from),
                None => log::info!("Recipient registered: {}", from),
            },
            Command::Stop => {
                if self.shutdown.signal_stop() {
                    log::info!("Stop requested by {}", from);
                }
            }
            Command::Unknown(text) => {
                log::debug!("Unknown command from {}: {:?}", from, text);
            }
        }
        let reply = command.reply();
        (command, reply)
    }
}

/// Running listener thread
pub struct ListenerHandle {
    handle: Option<JoinHandle<Result<()>>>,
    state: Arc<SharedState>,
    closer: Arc<ReceiveCloser>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        self.state.get()
    }

    /// Whether the listener thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Unblock the receive call; see [`ReceiveCloser::close`]
    pub fn close(&self) -> Result<()> {
        self.closer.close()
    }

    /// Wait for the thread and return its result
    pub fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanic)?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::protocol::{REPLY_STOPPING, REPLY_STREAMING, REPLY_UNKNOWN};

    fn listener() -> CommandListener {
        CommandListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(RecipientRegistry::new()),
            Arc::new(ShutdownFlag::new()),
        )
        .unwrap()
    }

    fn client(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_state_starts_idle() {
        assert_eq!(listener().state(), ListenerState::Idle);
    }

    #[test]
    fn test_dispatch_send_registers_sender() {
        let listener = listener();
        let (command, reply) = listener.dispatch(b"send\r\n", client(4000));

        assert_eq!(command, Command::Send);
        assert_eq!(reply, Some(REPLY_STREAMING));
        assert_eq!(listener.registry.current(), Some(client(4000)));
    }

    #[test]
    fn test_dispatch_stop_twice_is_idempotent() {
        let listener = listener();

        let (_, first) = listener.dispatch(b"stop\n", client(4000));
        assert!(listener.shutdown.is_stopping());
        let (_, second) = listener.dispatch(b"stop\n", client(4000));

        assert_eq!(first, Some(REPLY_STOPPING));
        assert_eq!(first, second);
        assert!(listener.shutdown.is_stopping());
        // The first dispatch already performed the transition
        assert!(!listener.shutdown.signal_stop());
    }

    #[test]
    fn test_dispatch_unknown_changes_nothing() {
        let listener = listener();
        let (_, reply) = listener.dispatch(b"ping\n", client(4000));

        assert_eq!(reply, Some(REPLY_UNKNOWN));
        assert!(!listener.registry.is_registered());
        assert!(!listener.shutdown.is_stopping());
    }

    #[test]
    fn test_dispatch_empty_has_no_reply() {
        let listener = listener();
        let (command, reply) = listener.dispatch(b"\n", client(4000));

        assert_eq!(command, Command::Empty);
        assert_eq!(reply, None);
        assert!(!listener.registry.is_registered());
    }

    #[test]
    fn test_wake_address_for_unspecified_bind() {
        assert_eq!(
            wake_address("0.0.0.0:12345".parse().unwrap()),
            "127.0.0.1:12345".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            wake_address("192.168.7.2:12345".parse().unwrap()),
            "192.168.7.2:12345".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_bind_conflict_is_socket_error() {
        let first = listener();
        let taken = first.local_addr().unwrap();
        let second = CommandListener::bind(
            taken,
            Arc::new(RecipientRegistry::new()),
            Arc::new(ShutdownFlag::new()),
        );
        assert!(matches!(second, Err(Error::Socket(_))));
    }

    #[test]
    fn test_close_unblocks_idle_listener() {
        let listener = listener();
        let shutdown = Arc::clone(&listener.shutdown);
        let mut handle = listener.spawn().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(handle.state(), ListenerState::Listening);

        let started = std::time::Instant::now();
        shutdown.signal_stop();
        handle.close().unwrap();
        handle.join().unwrap();
        assert!(started.elapsed() < RECV_POLL_INTERVAL * 5);
        assert_eq!(handle.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_close_after_traffic_exits_cleanly() {
        let listener = listener();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::clone(&listener.shutdown);
        let registry = Arc::clone(&listener.registry);
        let outbound = listener.outbound_socket().unwrap();
        let mut handle = listener.spawn().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(std::time::Duration::from_millis(500)))
            .unwrap();
        peer.send_to(b"send\n", addr).unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], REPLY_STREAMING.as_bytes());

        // Traffic on the shared socket while the listener is parked
        let target = registry.current().unwrap();
        for _ in 0..50 {
            outbound.send_to(b"1.65040\n", target).unwrap();
        }
        peer.send_to(b"ping\n", addr).unwrap();

        shutdown.signal_stop();
        handle.close().unwrap();
        handle.join().unwrap();
        assert_eq!(handle.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_close_while_running_is_receive_error() {
        let listener = listener();
        let shutdown = Arc::clone(&listener.shutdown);
        let mut handle = listener.spawn().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.close().unwrap();

        let result = handle.join();
        assert!(matches!(result, Err(Error::Receive(_))), "{result:?}");
        assert_eq!(handle.state(), ListenerState::Stopped);
        assert!(!shutdown.is_stopping());
    }

    #[test]
    fn test_socket_released_before_stopped() {
        let listener = listener();
        let addr = listener.local_addr().unwrap();
        let closer = listener.closer();
        let shutdown = Arc::clone(&listener.shutdown);
        let mut handle = listener.spawn().unwrap();

        shutdown.signal_stop();
        closer.close().unwrap();
        handle.join().unwrap();

        assert_eq!(handle.state(), ListenerState::Stopped);
        assert!(!closer.holds_socket());
        // Every copy is gone, so the port can be bound again
        let rebound = UdpSocket::bind(addr);
        assert!(rebound.is_ok(), "{rebound:?}");
        // Closing after exit is a no-op
        closer.close().unwrap();
    }
}
