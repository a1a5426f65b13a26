//! UDP client for the streaming daemon
//!
//! Used by the `ecg-capture` binary and the integration tests.

use crate::error::{Error, Result};
use crate::streaming::protocol::{REPLY_STREAMING, parse_sample};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Larger than any line the daemon sends
const RECV_BUFFER: usize = 512;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct StreamClient {
    socket: UdpSocket,
    server: SocketAddr,
    buf: [u8; RECV_BUFFER],
}

impl StreamClient {
    /// Bind an ephemeral local port in the server's address family
    pub fn connect(server: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(Error::Socket)?;
        socket
            .set_read_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(Error::Socket)?;
        Ok(Self {
            socket,
            server,
            buf: [0; RECV_BUFFER],
        })
    }

    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(Error::Socket)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Error::Socket)
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Send a raw command line
    pub fn send_command(&self, command: &str) -> Result<()> {
        self.socket
            .send_to(command.as_bytes(), self.server)
            .map_err(Error::Send)?;
        Ok(())
    }

    /// Send a command and wait for its reply, skipping sample lines
    pub fn request(&mut self, command: &str) -> Result<String> {
        self.send_command(command)?;
        loop {
            match self.recv_line()? {
                Some(line) if parse_sample(&line).is_some() => continue,
                Some(line) => return Ok(line),
                None => {
                    return Err(Error::Receive(std::io::Error::new(
                        ErrorKind::TimedOut,
                        format!("no reply to {:?}", command.trim_end()),
                    )));
                }
            }
        }
    }

    /// Register as the streaming recipient
    pub fn subscribe(&mut self) -> Result<()> {
        let reply = self.request("send\n")?;
        if reply != REPLY_STREAMING {
            return Err(Error::Other(format!(
                "unexpected reply to send: {:?}",
                reply
            )));
        }
        log::info!("Subscribed to {}", self.server);
        Ok(())
    }

    /// Ask the daemon to shut down and return its reply
    pub fn stop_server(&mut self) -> Result<String> {
        self.request("stop\n")
    }

    /// Next datagram from the server as text, `None` on timeout
    ///
    /// Datagrams from other peers are ignored.
    pub fn recv_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, from)) if from == self.server || self.server.ip().is_unspecified() => {
                    return Ok(Some(String::from_utf8_lossy(&self.buf[..n]).into_owned()));
                }
                Ok((_, from)) => log::debug!("Ignoring datagram from {}", from),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Receive(e)),
            }
        }
    }

    /// Next sample in volts, `None` on timeout
    ///
    /// Non-sample lines (late replies) are skipped.
    pub fn recv_sample(&mut self) -> Result<Option<f64>> {
        loop {
            match self.recv_line()? {
                Some(line) => match parse_sample(&line) {
                    Some(value) => return Ok(Some(value)),
                    None => log::debug!("Skipping non-sample line {:?}", line.trim_end()),
                },
                None => return Ok(None),
            }
        }
    }
}
