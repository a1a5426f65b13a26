//! Linux spidev transport

use super::Transfer;
use crate::config::BusConfig;
use crate::error::{Error, Result};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

/// spidev device opened and configured for the ADC
pub struct SpiTransport {
    spi: Spidev,
}

impl SpiTransport {
    /// Open a spidev node and apply mode, word size and clock speed
    ///
    /// # Arguments
    /// * `config` - Device path and bus parameters (e.g., "/dev/spidev0.0", mode 0, 8 bits, 250 kHz)
    pub fn open(config: &BusConfig) -> Result<Self> {
        let mut spi = Spidev::open(&config.device)
            .map_err(|e| Error::BusConfig(format!("open {}: {}", config.device, e)))?;

        let options = SpidevOptions::new()
            .mode(mode_flags(config.mode)?)
            .bits_per_word(config.bits_per_word)
            .max_speed_hz(config.max_speed_hz)
            .build();
        spi.configure(&options)
            .map_err(|e| Error::BusConfig(format!("configure {}: {}", config.device, e)))?;

        log::info!(
            "Opened SPI bus: {} (mode {}, {} bits, {} Hz)",
            config.device,
            config.mode,
            config.bits_per_word,
            config.max_speed_hz
        );

        Ok(Self { spi })
    }
}

fn mode_flags(mode: u8) -> Result<SpiModeFlags> {
    match mode {
        0 => Ok(SpiModeFlags::SPI_MODE_0),
        1 => Ok(SpiModeFlags::SPI_MODE_1),
        2 => Ok(SpiModeFlags::SPI_MODE_2),
        3 => Ok(SpiModeFlags::SPI_MODE_3),
        other => Err(Error::BusConfig(format!("unsupported SPI mode {}", other))),
    }
}

impl Transfer for SpiTransport {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<usize> {
        let len = tx.len().min(rx.len());
        let mut transfer = SpidevTransfer::read_write(&tx[..len], &mut rx[..len]);
        // spidev only reports success or failure of the ioctl, not a count.
        self.spi
            .transfer(&mut transfer)
            .map_err(|e| Error::Bus(e.to_string()))?;
        Ok(len)
    }
}
