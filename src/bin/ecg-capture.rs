//! ecg-capture - record a stream from ecg-stream to CSV
//!
//! Usage: `ecg-capture <server addr> [--seconds N] [--output path] [--stop]`
//!
//! Writes `index,time_s,voltage` rows, where `time_s` is the receive time
//! relative to the first sample.

use clap::Parser;
use ecg_stream::client::StreamClient;
use ecg_stream::{Error, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "ecg-capture")]
#[command(about = "Record samples from an ecg-stream server to CSV")]
struct CaptureArgs {
    /// Server address (host:port)
    server: String,

    /// Recording duration in seconds
    #[arg(short, long, default_value = "10.0")]
    seconds: f64,

    /// Output CSV file
    #[arg(short, long, default_value = "ecg_log.csv")]
    output: PathBuf,

    /// Send `stop` to the server when done
    #[arg(long)]
    stop: bool,
}

impl CaptureArgs {
    fn server_addr(&self) -> Result<SocketAddr> {
        self.server
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("cannot resolve {}", self.server)))
    }

    fn duration(&self) -> Result<Duration> {
        if !(self.seconds.is_finite() && self.seconds > 0.0) {
            return Err(Error::Config(format!(
                "--seconds must be positive, got {}",
                self.seconds
            )));
        }
        Ok(Duration::from_secs_f64(self.seconds))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CaptureArgs::parse();
    let server = args.server_addr()?;
    let duration = args.duration()?;
    let mut client = StreamClient::connect(server)?;
    client.subscribe()?;

    let mut writer = csv::Writer::from_path(&args.output)?;
    writer.write_record(["index", "time_s", "voltage"])?;

    log::info!(
        "Recording {:.1}s from {} to {}",
        duration.as_secs_f64(),
        server,
        args.output.display()
    );

    let mut index: u64 = 0;
    let mut first: Option<Instant> = None;
    let deadline = Instant::now() + duration;

    while Instant::now() < deadline {
        let Some(voltage) = client.recv_sample()? else {
            log::warn!("No samples for a while, still waiting...");
            continue;
        };
        let start = *first.get_or_insert_with(Instant::now);
        writer.write_record(&[
            index.to_string(),
            format!("{:.6}", start.elapsed().as_secs_f64()),
            format!("{:.5}", voltage),
        ])?;
        index += 1;
    }
    writer.flush()?;
    log::info!("Wrote {} samples to {}", index, args.output.display());

    if args.stop {
        let reply = client.stop_server()?;
        log::info!("Server replied: {}", reply.trim_end());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CaptureArgs::try_parse_from(["ecg-capture", "127.0.0.1:12345"]).unwrap();
        assert_eq!(args.server_addr().unwrap(), "127.0.0.1:12345".parse().unwrap());
        assert_eq!(args.duration().unwrap(), Duration::from_secs(10));
        assert_eq!(args.output, PathBuf::from("ecg_log.csv"));
        assert!(!args.stop);
    }

    #[test]
    fn test_flags() {
        let args = CaptureArgs::try_parse_from([
            "ecg-capture",
            "127.0.0.1:9000",
            "-s",
            "2.5",
            "--output",
            "run.csv",
            "--stop",
        ])
        .unwrap();
        assert_eq!(args.duration().unwrap(), Duration::from_millis(2500));
        assert_eq!(args.output, PathBuf::from("run.csv"));
        assert!(args.stop);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(CaptureArgs::try_parse_from(["ecg-capture"]).is_err());

        let args = CaptureArgs::try_parse_from(["ecg-capture", "127.0.0.1:1", "-s", "0"]).unwrap();
        assert!(matches!(args.duration(), Err(Error::Config(_))));
    }
}
