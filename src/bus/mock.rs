//! Mock bus implementations for hardware-free testing

use super::{AdcBus, FRAME_LEN, MAX_RAW, Transfer};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

enum ScriptedTransfer {
    Response([u8; FRAME_LEN]),
    Short(usize),
    Fail,
}

struct MockTransportInner {
    script: VecDeque<ScriptedTransfer>,
    sent: Vec<[u8; FRAME_LEN]>,
}

/// Mock [`Transfer`] replaying scripted response frames
///
/// Clones share state, so a test can keep one handle while the converter
/// owns another. An empty script answers with an all-zero frame.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                script: VecDeque::new(),
                sent: Vec::new(),
            })),
        }
    }

    /// Queue a full response frame
    pub fn inject_response(&self, rx: [u8; FRAME_LEN]) {
        self.inner
            .lock()
            .script
            .push_back(ScriptedTransfer::Response(rx));
    }

    /// Queue a transfer that moves only `bytes` bytes
    pub fn inject_short(&self, bytes: usize) {
        self.inner
            .lock()
            .script
            .push_back(ScriptedTransfer::Short(bytes));
    }

    /// Queue a transfer that fails outright
    pub fn inject_failure(&self) {
        self.inner.lock().script.push_back(ScriptedTransfer::Fail);
    }

    /// Command frames written so far
    pub fn sent_frames(&self) -> Vec<[u8; FRAME_LEN]> {
        self.inner.lock().sent.clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transfer for MockTransport {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();

        let mut frame = [0u8; FRAME_LEN];
        let n = tx.len().min(FRAME_LEN);
        frame[..n].copy_from_slice(&tx[..n]);
        inner.sent.push(frame);

        match inner.script.pop_front() {
            Some(ScriptedTransfer::Response(response)) => {
                let n = rx.len().min(FRAME_LEN);
                rx[..n].copy_from_slice(&response[..n]);
                Ok(n)
            }
            Some(ScriptedTransfer::Short(bytes)) => Ok(bytes.min(rx.len())),
            Some(ScriptedTransfer::Fail) => Err(Error::Bus("mock transfer failure".to_string())),
            None => {
                rx.fill(0);
                Ok(rx.len())
            }
        }
    }
}

struct MockAdcInner {
    script: VecDeque<Option<u16>>,
    fallback: u16,
    channels: Vec<u8>,
}

/// Mock [`AdcBus`] returning scripted raw readings
///
/// `None` entries in the script produce [`Error::Bus`]. Once the script is
/// exhausted every read returns the fallback value.
#[derive(Clone)]
pub struct MockAdc {
    inner: Arc<Mutex<MockAdcInner>>,
}

impl MockAdc {
    /// Create a mock that returns `fallback` for unscripted reads
    pub fn new(fallback: u16) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockAdcInner {
                script: VecDeque::new(),
                fallback: fallback.min(MAX_RAW),
                channels: Vec::new(),
            })),
        }
    }

    /// Queue raw readings
    pub fn push_readings(&self, readings: &[u16]) {
        let mut inner = self.inner.lock();
        inner
            .script
            .extend(readings.iter().map(|&raw| Some(raw.min(MAX_RAW))));
    }

    /// Queue `count` failed transfers
    pub fn push_failures(&self, count: usize) {
        let mut inner = self.inner.lock();
        inner.script.extend(std::iter::repeat_n(None, count));
    }

    /// Number of reads performed
    pub fn read_count(&self) -> usize {
        self.inner.lock().channels.len()
    }

    /// Channels requested, in order
    pub fn channels(&self) -> Vec<u8> {
        self.inner.lock().channels.clone()
    }
}

impl AdcBus for MockAdc {
    fn read(&mut self, channel: u8) -> Result<u16> {
        super::command_frame(channel)?;

        let mut inner = self.inner.lock();
        inner.channels.push(channel);
        match inner.script.pop_front() {
            Some(Some(raw)) => Ok(raw),
            Some(None) => Err(Error::Bus("mock read failure".to_string())),
            None => Ok(inner.fallback),
        }
    }
}

/// Synthetic ECG-like waveform at 72 BPM
///
/// Baseline near mid-scale with P, QRS and T bumps, sampled at the
/// configured rate. Lets the daemon stream plausible data without an ADC.
#[cfg(feature = "mock")]
pub struct SyntheticEcg {
    sample_rate_hz: f64,
    index: u64,
}

#[cfg(feature = "mock")]
impl SyntheticEcg {
    const BEAT_PERIOD_S: f64 = 60.0 / 72.0;
    const BASELINE: f64 = 1900.0;

    // (centre within beat in seconds, width in seconds, amplitude in counts)
    const WAVES: [(f64, f64, f64); 5] = [
        (0.20, 0.025, 120.0),   // P
        (0.34, 0.008, -150.0),  // Q
        (0.36, 0.010, 1400.0),  // R
        (0.38, 0.008, -300.0),  // S
        (0.60, 0.040, 350.0),   // T
    ];

    pub fn new(sample_rate_hz: f64) -> Self {
        Self {
            sample_rate_hz,
            index: 0,
        }
    }

    fn value_at(t: f64) -> u16 {
        let phase = t % Self::BEAT_PERIOD_S;
        let v = Self::WAVES
            .iter()
            .fold(Self::BASELINE, |acc, &(centre, width, amplitude)| {
                let x = (phase - centre) / width;
                acc + amplitude * (-0.5 * x * x).exp()
            });
        v.round().clamp(0.0, f64::from(MAX_RAW)) as u16
    }
}

#[cfg(feature = "mock")]
impl AdcBus for SyntheticEcg {
    fn read(&mut self, channel: u8) -> Result<u16> {
        super::command_frame(channel)?;
        let t = self.index as f64 / self.sample_rate_hz;
        self.index += 1;
        Ok(Self::value_at(t))
    }
}
