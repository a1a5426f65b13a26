//! ecg-stream - SPI ADC sampling daemon with UDP streaming
//!
//! Samples one channel of an MCP3208-class converter at a fixed rate and
//! streams the readings, in volts, to the last UDP client that sent `send`.
//!
//! ## Threads
//!
//! - **adc-sampler**: periodic bus read → convert → [`streaming::Streamer::emit`]
//! - **udp-listener**: receives `send` / `stop` commands on the well-known port
//! - **main**: waits on the [`shutdown::ShutdownFlag`] and joins both
//!
//! ## Features
//!
//! - `mock`: `bus.device = "mock"` selects a synthetic ECG source

pub mod app;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod sampler;
pub mod shutdown;
pub mod streaming;

// Re-export commonly used types
pub use app::EcgServer;
pub use config::AppConfig;
pub use error::{Error, Result};
