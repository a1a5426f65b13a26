//! ecg-stream - SPI ADC sampling daemon
//!
//! Samples the configured ADC channel and streams volts as `"%.5f\n"`
//! datagrams to the last UDP client that sent `send`. `stop` (or
//! SIGINT/SIGTERM) shuts it down.

use ecg_stream::{AppConfig, EcgServer, Result};
use std::env;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `ecg-stream <path>` (positional)
/// - `ecg-stream --config <path>` (flag-based)
/// - `ecg-stream -c <path>` (short flag)
///
/// Built-in defaults are used when no path is given.
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = match &config_path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("ecg-stream v{} starting...", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => log::info!("Using config: {}", path),
        None => log::info!("No config given, using defaults"),
    }
    log::info!(
        "Bus {} (mode {}, {} Hz), channel {}, {} Hz sampling",
        config.bus.device,
        config.bus.mode,
        config.bus.max_speed_hz,
        config.sampler.channel,
        config.sampler.sample_rate_hz
    );

    let mut server = EcgServer::start(config)?;
    server.install_signal_handler()?;
    server.run()?;

    log::info!("ecg-stream stopped");
    Ok(())
}
