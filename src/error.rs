//! Error types for ecg-stream

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// ecg-stream error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bus transfer failed or returned fewer bytes than requested
    #[error("Bus transfer failed: {0}")]
    Bus(String),

    /// Channel index outside the converter's single-ended inputs
    #[error("Invalid ADC channel {0} (expected 0-7)")]
    InvalidChannel(u8),

    /// Opening or configuring the bus device failed
    #[error("Bus configuration failed: {0}")]
    BusConfig(String),

    /// Creating or binding the listener socket failed
    #[error("Socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// Receive failed while the server was still running
    #[error("Receive error: {0}")]
    Receive(#[source] std::io::Error),

    /// Datagram send failed
    #[error("Send error: {0}")]
    Send(#[source] std::io::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// CSV output error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A worker thread panicked
    #[error("Thread panicked")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
