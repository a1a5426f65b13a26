//! Daemon orchestration
//!
//! Opens the bus, binds the listener, starts both threads and tears them
//! down in order once the shutdown flag is set (by a `stop` datagram or by
//! SIGINT/SIGTERM).

use crate::bus::{self, AdcBus};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::sampler::{Sampler, SamplerHandle, SamplerState, SamplerStats};
use crate::shutdown::ShutdownFlag;
use crate::streaming::{
    CommandListener, ListenerHandle, ListenerState, ReceiveCloser, RecipientRegistry, Streamer,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle as SignalsHandle, Signals};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Running sampler + listener pair
pub struct EcgServer {
    config: AppConfig,
    local_addr: SocketAddr,
    shutdown: Arc<ShutdownFlag>,
    registry: Arc<RecipientRegistry>,
    closer: Arc<ReceiveCloser>,
    sampler: SamplerHandle,
    listener: ListenerHandle,
    signals: Option<(SignalsHandle, JoinHandle<()>)>,
    last_stats: (Instant, u64),
    stopped: bool,
}

impl EcgServer {
    /// Open the configured bus and start serving
    pub fn start(config: AppConfig) -> Result<Self> {
        config.validate()?;
        log::info!("Opening ADC bus {}", config.bus.device);
        let bus = bus::open_bus(&config.bus, config.sampler.sample_rate_hz)?;
        Self::start_with_bus(config, bus)
    }

    /// Start serving with an already opened bus
    pub fn start_with_bus<B: AdcBus + 'static>(config: AppConfig, bus: B) -> Result<Self> {
        config.validate()?;

        let shutdown = Arc::new(ShutdownFlag::new());
        let registry = Arc::new(RecipientRegistry::new());

        let listener = CommandListener::bind(
            config.network.socket_addr()?,
            Arc::clone(&registry),
            Arc::clone(&shutdown),
        )?;
        let local_addr = listener.local_addr()?;
        let closer = listener.closer();
        let streamer = Streamer::new(listener.outbound_socket()?, Arc::clone(&registry));
        let sampler = Sampler::new(bus, &config.sampler, streamer, Arc::clone(&shutdown))?;

        let mut listener = listener.spawn()?;
        let sampler = match sampler.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                abort_listener(&shutdown, &closer, &mut listener);
                return Err(e);
            }
        };

        log::info!("✓ Sampler and listener started");

        Ok(Self {
            config,
            local_addr,
            shutdown,
            registry,
            closer,
            sampler,
            listener,
            signals: None,
            last_stats: (Instant::now(), 0),
            stopped: false,
        })
    }

    /// Turn SIGINT/SIGTERM into an orderly shutdown
    pub fn install_signal_handler(&mut self) -> Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])
            .map_err(|e| Error::Other(format!("Failed to register signal handlers: {}", e)))?;
        let handle = signals.handle();
        let shutdown = Arc::clone(&self.shutdown);
        let closer = Arc::clone(&self.closer);

        let thread = thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    log::info!("Received signal {}, initiating shutdown...", sig);
                    shutdown.signal_stop();
                    if let Err(e) = closer.close() {
                        log::warn!("Failed to unblock listener: {}", e);
                    }
                }
            })
            .map_err(|e| Error::Other(format!("Failed to spawn signal handler thread: {}", e)))?;

        self.signals = Some((handle, thread));
        Ok(())
    }

    /// Block until shutdown is requested, then stop both threads
    pub fn run(&mut self) -> Result<()> {
        log::info!(
            "ecg-stream listening on {} (send 'send' to stream, 'stop' to exit)",
            self.local_addr
        );

        match self.config.logging.stats_interval_secs {
            0 => self.shutdown.wait(),
            secs => {
                let interval = Duration::from_secs(secs);
                while !self.shutdown.wait_timeout(interval) {
                    self.log_statistics();
                }
            }
        }

        log::info!("Shutdown requested, stopping threads...");
        self.stop()
    }

    /// Signal shutdown and unblock the listener without waiting
    pub fn request_stop(&self) {
        if self.shutdown.signal_stop() {
            log::debug!("Shutdown flag set");
        }
        if let Err(e) = self.closer.close() {
            log::warn!("Failed to unblock listener: {}", e);
        }
    }

    /// Stop and join both threads
    ///
    /// Returns the first thread error, if any.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.request_stop();

        let listener_result = self.listener.join();
        let sampler_result = self.sampler.join();

        if let Some((handle, thread)) = self.signals.take() {
            handle.close();
            if thread.join().is_err() {
                log::warn!("Signal handler thread panicked");
            }
        }
        // Listener normally releases it on exit; covers a panicked thread
        self.closer.release();
        self.stopped = true;

        let stats = self.sampler.stats();
        log::info!(
            "✓ All threads stopped ({} samples, {} read failures)",
            stats.samples(),
            stats.read_failures()
        );

        sampler_result.and(listener_result)
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_flag(&self) -> Arc<ShutdownFlag> {
        Arc::clone(&self.shutdown)
    }

    pub fn registry(&self) -> Arc<RecipientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn sampler_stats(&self) -> Arc<SamplerStats> {
        self.sampler.stats()
    }

    pub fn sampler_state(&self) -> SamplerState {
        self.sampler.state()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Whether the listener thread has exited (after `stop` or a fatal error)
    pub fn listener_finished(&self) -> bool {
        self.listener.is_finished()
    }

    fn log_statistics(&mut self) {
        let stats = self.sampler.stats();
        let samples = stats.samples();
        let (since, previous) = self.last_stats;
        let elapsed = since.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            (samples - previous) as f64 / elapsed
        } else {
            0.0
        };
        self.last_stats = (Instant::now(), samples);

        let recipient = self
            .registry
            .current()
            .map_or_else(|| "none".to_string(), |addr| addr.to_string());
        log::info!(
            "Sampler: {} samples ({:.0}/s), {} read failures, {} missed ticks; recipient: {}",
            samples,
            rate,
            stats.read_failures(),
            stats.missed_ticks(),
            recipient
        );
    }
}

/// Stop a listener whose sampler never started
fn abort_listener(shutdown: &ShutdownFlag, closer: &ReceiveCloser, listener: &mut ListenerHandle) {
    shutdown.signal_stop();
    if let Err(e) = closer.close() {
        log::warn!("Failed to unblock listener: {}", e);
    }
    if let Err(e) = listener.join() {
        log::warn!("Listener exited with error: {}", e);
    }
}

impl Drop for EcgServer {
    fn drop(&mut self) {
        if !self.stopped {
            log::debug!("EcgServer dropped while running, stopping threads");
            if let Err(e) = self.stop() {
                log::error!("Error during cleanup: {}", e);
            }
        }
    }
}
