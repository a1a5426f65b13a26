//! Text wire protocol
//!
//! | Direction | Payload | Meaning |
//! |-----------|---------|---------|
//! | client → server | `send\n` | register caller as the streaming recipient |
//! | client → server | `stop\n` | request daemon shutdown |
//! | client → server | anything else | answered with the usage line |
//! | server → recipient | `"%.5f\n"` | one sample, volts |
//!
//! Trailing `\r`/`\n` characters are ignored, so `send`, `send\n` and
//! `send\r\n` are the same command. Matching is exact and case-sensitive.

use std::fmt::Write;

/// Reply to `send`
pub const REPLY_STREAMING: &str = "OK: streaming ECG samples.\n";
/// Reply to `stop`
pub const REPLY_STOPPING: &str = "Stopping server.\n";
/// Reply to anything unrecognized
pub const REPLY_UNKNOWN: &str = "Unknown command. Use: send or stop\n";

/// Digits after the decimal point in a sample line
pub const SAMPLE_DECIMALS: usize = 5;

/// Parsed control datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Nothing but line terminators
    Empty,
    /// Start streaming to the sender
    Send,
    /// Shut the daemon down
    Stop,
    /// Unrecognized text (trimmed)
    Unknown(String),
}

impl Command {
    /// Decode a datagram payload
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        match text.trim_end_matches(['\r', '\n']) {
            "" => Command::Empty,
            "send" => Command::Send,
            "stop" => Command::Stop,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Literal reply line, `None` for empty input
    pub fn reply(&self) -> Option<&'static str> {
        match self {
            Command::Empty => None,
            Command::Send => Some(REPLY_STREAMING),
            Command::Stop => Some(REPLY_STOPPING),
            Command::Unknown(_) => Some(REPLY_UNKNOWN),
        }
    }
}

/// Append one sample line (`"{:.5}\n"`) to `out`
#[inline]
pub fn format_sample(value: f64, out: &mut String) {
    // Writing into a String cannot fail
    let _ = writeln!(out, "{:.*}", SAMPLE_DECIMALS, value);
}

/// Parse a sample line, requiring exactly five decimals
pub fn parse_sample(line: &str) -> Option<f64> {
    let line = line.trim_end_matches(['\r', '\n']);
    let digits = line.strip_prefix('-').unwrap_or(line);
    let (int_part, frac_part) = digits.split_once('.')?;

    if int_part.is_empty()
        || frac_part.len() != SAMPLE_DECIMALS
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    line.parse().ok()
}
