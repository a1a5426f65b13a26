//! ADC bus access
//!
//! Two layers, transport below protocol:
//!
//! - [`Transfer`]: one full-duplex exchange on a bus, reporting how many
//!   bytes actually moved. [`SpiTransport`] talks to a Linux spidev node;
//!   [`MockTransport`] replays scripted responses.
//! - [`AdcBus`]: "read channel N" on top of a transfer. [`Mcp3208`] builds
//!   the 3-byte command frame for an MCP3208-class 12-bit, 8-channel
//!   converter and decodes the response.
//!
//! # Frame Format
//!
//! ```text
//! TX: [0b0000_011D] [D D 00_0000] [0000_0000]    start=1, single-ended=1, D=channel bits
//! RX: [xxxx_xxxx]   [xxxx_B11..B8] [B7..B0]      12-bit result
//! ```

pub mod mock;
#[cfg(target_os = "linux")]
mod spi;

pub use mock::{MockAdc, MockTransport};
#[cfg(feature = "mock")]
pub use mock::SyntheticEcg;
#[cfg(target_os = "linux")]
pub use spi::SpiTransport;

use crate::config::{BusConfig, MAX_CHANNEL};
use crate::error::{Error, Result};

/// Bytes exchanged per conversion
pub const FRAME_LEN: usize = 3;

/// Largest raw reading a 12-bit converter can return
pub const MAX_RAW: u16 = 0x0FFF;

/// Full-duplex bus exchange
pub trait Transfer: Send {
    /// Write `tx` while reading into `rx`, returning the number of bytes
    /// transferred
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<usize>;
}

/// Source of raw ADC readings
pub trait AdcBus: Send {
    /// Perform one conversion on `channel` and return the raw count
    ///
    /// Exactly one bus transfer per call, no retry.
    fn read(&mut self, channel: u8) -> Result<u16>;
}

impl<B: AdcBus + ?Sized> AdcBus for Box<B> {
    fn read(&mut self, channel: u8) -> Result<u16> {
        (**self).read(channel)
    }
}

/// Build the command frame for a single-ended read of `channel`
pub fn command_frame(channel: u8) -> Result<[u8; FRAME_LEN]> {
    if channel > MAX_CHANNEL {
        return Err(Error::InvalidChannel(channel));
    }
    Ok([0x06 | ((channel & 0x04) >> 2), (channel & 0x03) << 6, 0x00])
}

/// Extract the 12-bit reading from a response frame
#[inline]
pub fn decode_frame(rx: &[u8; FRAME_LEN]) -> u16 {
    (u16::from(rx[1] & 0x0F) << 8) | u16::from(rx[2])
}

/// MCP3208-class converter on top of a [`Transfer`]
pub struct Mcp3208<T: Transfer> {
    transport: T,
}

impl<T: Transfer> Mcp3208<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: Transfer> AdcBus for Mcp3208<T> {
    /// One 3-byte exchange, decoded to a 12-bit count
    ///
    /// A transfer reporting fewer than [`FRAME_LEN`] bytes is an
    /// [`Error::Bus`]. [`SpiTransport`] cannot detect short transfers:
    /// spidev only reports whether the ioctl failed, so on hardware the
    /// short-transfer check never fires and only outright failures surface.
    fn read(&mut self, channel: u8) -> Result<u16> {
        let tx = command_frame(channel)?;
        let mut rx = [0u8; FRAME_LEN];

        let transferred = self.transport.transfer(&tx, &mut rx)?;
        if transferred < FRAME_LEN {
            return Err(Error::Bus(format!(
                "short transfer: {} of {} bytes",
                transferred, FRAME_LEN
            )));
        }

        Ok(decode_frame(&rx))
    }
}

/// Open and configure the bus described by `config`
///
/// Failure here is fatal to the sampler: it never enters its running state.
pub fn open_bus(config: &BusConfig, sample_rate_hz: f64) -> Result<Box<dyn AdcBus>> {
    if let Some(bus) = open_mock(config, sample_rate_hz) {
        return Ok(bus);
    }
    open_spi(config)
}

#[cfg(feature = "mock")]
fn open_mock(config: &BusConfig, sample_rate_hz: f64) -> Option<Box<dyn AdcBus>> {
    if config.device != "mock" {
        return None;
    }
    log::info!("Using synthetic ECG source (mock bus)");
    Some(Box::new(SyntheticEcg::new(sample_rate_hz)))
}

#[cfg(not(feature = "mock"))]
fn open_mock(_config: &BusConfig, _sample_rate_hz: f64) -> Option<Box<dyn AdcBus>> {
    None
}

#[cfg(target_os = "linux")]
fn open_spi(config: &BusConfig) -> Result<Box<dyn AdcBus>> {
    let transport = SpiTransport::open(config)?;
    Ok(Box::new(Mcp3208::new(transport)))
}

#[cfg(not(target_os = "linux"))]
fn open_spi(config: &BusConfig) -> Result<Box<dyn AdcBus>> {
    Err(Error::BusConfig(format!(
        "{}: spidev is only available on Linux",
        config.device
    )))
}
