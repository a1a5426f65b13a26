//! ADC sampling thread
//!
//! Reads one channel at a fixed rate, converts counts to volts and hands
//! each value to the [`Streamer`].
//!
//! # State Machine
//!
//! ```text
//! Idle ──spawn──▶ Running ──shutdown flag──▶ Stopping ──bus closed──▶ Stopped
//! ```
//!
//! # Timing
//!
//! The loop sleeps until a monotonic deadline rather than for a fixed delay,
//! so the time spent in the transfer and the send does not accumulate as
//! drift. At 2 kHz the period is 500µs. If the thread falls a full period or
//! more behind (scheduler stall), the missed ticks are counted and the
//! deadline restarts from now instead of bursting to catch up. Shutdown
//! latency is bounded by one period plus one transfer.
//!
//! # Read Failures
//!
//! A failed transfer drops that sample and sampling continues at the next
//! scheduled tick. There is no early retry. The first failure of a run is
//! logged at warn, the rest at debug, and recovery at info.

use crate::bus::AdcBus;
use crate::config::{MAX_CHANNEL, SamplerConfig};
use crate::error::{Error, Result};
use crate::shutdown::ShutdownFlag;
use crate::streaming::Streamer;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Linear counts→volts conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub full_scale_counts: u16,
    pub reference_voltage: f64,
}

impl Scale {
    pub fn new(full_scale_counts: u16, reference_voltage: f64) -> Self {
        Self {
            full_scale_counts,
            reference_voltage,
        }
    }

    /// `raw / full_scale_counts * reference_voltage`
    #[inline]
    pub fn convert(&self, raw: u16) -> f64 {
        f64::from(raw) / f64::from(self.full_scale_counts) * self.reference_voltage
    }
}

impl From<&SamplerConfig> for Scale {
    fn from(config: &SamplerConfig) -> Self {
        Self::new(config.full_scale_counts, config.reference_voltage)
    }
}

/// Deadline-based periodic ticker
#[derive(Debug)]
pub struct PeriodicTicker {
    period: Duration,
    deadline: Instant,
}

impl PeriodicTicker {
    /// First deadline is one period from now
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: Instant::now(),
        }
    }

    /// Sleep until the next deadline
    ///
    /// Returns the number of whole periods that were missed (0 when on time).
    pub fn wait(&mut self) -> u64 {
        self.deadline += self.period;
        let now = Instant::now();

        if let Some(remaining) = self.deadline.checked_duration_since(now) {
            thread::sleep(remaining);
            return 0;
        }

        let behind = now - self.deadline;
        if behind < self.period {
            return 0;
        }
        let missed = (behind.as_nanos() / self.period.as_nanos().max(1)) as u64;
        self.deadline = now;
        missed
    }
}

/// Sampler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SamplerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SamplerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SamplerState::Idle,
            1 => SamplerState::Running,
            2 => SamplerState::Stopping,
            _ => SamplerState::Stopped,
        }
    }
}

/// Counters updated by the sampling thread
#[derive(Debug, Default)]
pub struct SamplerStats {
    samples: AtomicU64,
    read_failures: AtomicU64,
    missed_ticks: AtomicU64,
}

impl SamplerStats {
    /// Readings converted and handed to the streamer
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Failed bus transfers (samples skipped)
    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    /// Periods lost to scheduling stalls
    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks.load(Ordering::Relaxed)
    }
}

/// Sampling loop, moved onto its own thread by [`Sampler::spawn`]
pub struct Sampler<B: AdcBus> {
    bus: B,
    channel: u8,
    scale: Scale,
    period: Duration,
    streamer: Streamer,
    shutdown: Arc<ShutdownFlag>,
    state: Arc<AtomicU8>,
    stats: Arc<SamplerStats>,
    failure_run: u64,
}

impl<B: AdcBus + 'static> Sampler<B> {
    /// Build a sampler around an opened and configured bus
    pub fn new(
        bus: B,
        config: &SamplerConfig,
        streamer: Streamer,
        shutdown: Arc<ShutdownFlag>,
    ) -> Result<Self> {
        if config.channel > MAX_CHANNEL {
            return Err(Error::InvalidChannel(config.channel));
        }
        if !(config.sample_rate_hz.is_finite() && config.sample_rate_hz > 0.0) {
            return Err(Error::Config(format!(
                "sample_rate_hz must be positive, got {}",
                config.sample_rate_hz
            )));
        }

        Ok(Self {
            bus,
            channel: config.channel,
            scale: Scale::from(config),
            period: config.period(),
            streamer,
            shutdown,
            state: Arc::new(AtomicU8::new(SamplerState::Idle as u8)),
            stats: Arc::new(SamplerStats::default()),
            failure_run: 0,
        })
    }

    /// Start the sampling thread
    pub fn spawn(self) -> Result<SamplerHandle> {
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let handle = thread::Builder::new()
            .name("adc-sampler".to_string())
            .spawn(move || self.run())
            .map_err(|e| Error::Other(format!("Failed to spawn sampler thread: {}", e)))?;

        Ok(SamplerHandle {
            handle: Some(handle),
            state,
            stats,
        })
    }

    /// Sample until the shutdown flag is set, then close the bus
    pub fn run(mut self) {
        self.set_state(SamplerState::Running);
        log::info!(
            "Sampler started: channel {}, {:.0} Hz ({:?} period)",
            self.channel,
            1.0 / self.period.as_secs_f64(),
            self.period
        );

        let mut ticker = PeriodicTicker::new(self.period);
        while !self.shutdown.is_stopping() {
            self.sample_once();

            let missed = ticker.wait();
            if missed > 0 {
                self.stats.missed_ticks.fetch_add(missed, Ordering::Relaxed);
                log::debug!("Sampler fell behind by {} periods", missed);
            }
        }

        self.set_state(SamplerState::Stopping);
        let Self {
            bus,
            state,
            stats,
            streamer,
            ..
        } = self;
        drop(bus);
        log::info!(
            "Sampler stopped: {} samples, {} read failures, {} sent",
            stats.samples(),
            stats.read_failures(),
            streamer.sent_count()
        );
        state.store(SamplerState::Stopped as u8, Ordering::Release);
    }

    fn sample_once(&mut self) {
        match self.bus.read(self.channel) {
            Ok(raw) => {
                if self.failure_run > 0 {
                    log::info!(
                        "ADC reads recovered after {} failed transfers",
                        self.failure_run
                    );
                    self.failure_run = 0;
                }
                log::trace!("ADC ch{} raw {}", self.channel, raw);
                let volts = self.scale.convert(raw);
                self.streamer.emit(volts);
                self.stats.samples.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failure_run += 1;
                self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                if self.failure_run == 1 {
                    log::warn!("ADC read failed, skipping sample: {}", e);
                } else {
                    log::debug!("ADC read failed ({} in a row): {}", self.failure_run, e);
                }
            }
        }
    }

    fn set_state(&self, state: SamplerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Running sampler thread
pub struct SamplerHandle {
    handle: Option<JoinHandle<()>>,
    state: Arc<AtomicU8>,
    stats: Arc<SamplerStats>,
}

impl SamplerHandle {
    pub fn state(&self) -> SamplerState {
        SamplerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> Arc<SamplerStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the thread; the shutdown flag must be set first
    pub fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanic),
            None => Ok(()),
        }
    }
}
