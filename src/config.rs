//! Configuration for the ecg-stream daemon
//!
//! Loaded from a TOML file. Every section has defaults matching the
//! BeagleBone capture board (MCP3208 on `/dev/spidev0.0`, channel 1,
//! 2 kHz, UDP port 12345), so a partial file or no file at all is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Highest single-ended input on an 8-channel converter
pub const MAX_CHANNEL: u8 = 7;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub sampler: SamplerConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// SPI bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// spidev device path (`"mock"` selects the synthetic source when
    /// built with the `mock` feature)
    pub device: String,
    /// SPI mode (0-3)
    pub mode: u8,
    /// Word size in bits
    pub bits_per_word: u8,
    /// Maximum clock speed in Hz
    pub max_speed_hz: u32,
}

/// Sampling loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// ADC input channel (0-7)
    pub channel: u8,
    /// Target sampling frequency
    pub sample_rate_hz: f64,
    /// ADC reference voltage (volts at full scale)
    pub reference_voltage: f64,
    /// Raw count corresponding to the reference voltage
    pub full_scale_counts: u16,
}

/// UDP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Command/stream socket bind address
    ///
    /// Examples:
    /// - `0.0.0.0:12345` - All interfaces (default)
    /// - `127.0.0.1:12345` - Localhost only
    pub listen_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error); `RUST_LOG` wins
    pub level: String,
    /// Seconds between statistics lines, 0 disables
    pub stats_interval_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: "/dev/spidev0.0".to_string(),
            mode: 0,
            bits_per_word: 8,
            max_speed_hz: 250_000,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            sample_rate_hz: 2000.0,
            reference_voltage: 3.3,
            full_scale_counts: 4095,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:12345".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stats_interval_secs: 10,
        }
    }
}

impl SamplerConfig {
    /// Nominal time between two bus transfers
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz)
    }
}

impl NetworkConfig {
    /// Parsed bind address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            Error::Config(format!(
                "invalid listen_address '{}': {}",
                self.listen_address, e
            ))
        })
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the sampler or listener cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sampler.channel > MAX_CHANNEL {
            return Err(Error::InvalidChannel(self.sampler.channel));
        }
        if !(self.sampler.sample_rate_hz.is_finite() && self.sampler.sample_rate_hz > 0.0) {
            return Err(Error::Config(format!(
                "sample_rate_hz must be positive, got {}",
                self.sampler.sample_rate_hz
            )));
        }
        if !(self.sampler.reference_voltage.is_finite() && self.sampler.reference_voltage > 0.0) {
            return Err(Error::Config(format!(
                "reference_voltage must be positive, got {}",
                self.sampler.reference_voltage
            )));
        }
        if self.sampler.full_scale_counts == 0 {
            return Err(Error::Config("full_scale_counts must be non-zero".to_string()));
        }
        if self.bus.mode > 3 {
            return Err(Error::Config(format!(
                "SPI mode must be 0-3, got {}",
                self.bus.mode
            )));
        }
        self.network.socket_addr()?;
        Ok(())
    }
}
