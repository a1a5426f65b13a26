//! End-to-end daemon tests over localhost UDP
//!
//! Each test starts an [`EcgServer`] on `127.0.0.1:0` with a [`MockAdc`]
//! and talks to it through [`StreamClient`].
//!
//! Run with: `cargo test --test server_test`

use ecg_stream::bus::MockAdc;
use ecg_stream::client::StreamClient;
use ecg_stream::sampler::SamplerState;
use ecg_stream::streaming::ListenerState;
use ecg_stream::streaming::protocol::{REPLY_STOPPING, REPLY_STREAMING, REPLY_UNKNOWN};
use ecg_stream::{AppConfig, EcgServer, Error};
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.network.listen_address = "127.0.0.1:0".to_string();
    config.logging.stats_interval_secs = 0;
    config
}

/// Mid-scale reading: 2048 / 4095 * 3.3 V
const MID_SCALE: u16 = 2048;
const MID_SCALE_VOLTS: f64 = 2048.0 / 4095.0 * 3.3;

fn start_server(adc: MockAdc) -> EcgServer {
    EcgServer::start_with_bus(test_config(), adc).expect("server should start")
}

fn client_for(server: &EcgServer) -> StreamClient {
    let client = StreamClient::connect(server.local_addr()).unwrap();
    client.set_timeout(Duration::from_millis(500)).unwrap();
    client
}

/// Read lines until `quiet` passes without one
fn drain(client: &mut StreamClient, quiet: Duration) -> usize {
    client.set_timeout(quiet).unwrap();
    let mut count = 0;
    while client.recv_line().unwrap().is_some() {
        count += 1;
    }
    count
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_send_replies_and_streams_samples() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut client = client_for(&server);

    assert_eq!(client.request("send\n").unwrap(), REPLY_STREAMING);
    assert_eq!(
        server.registry().current().map(|addr| addr.port()),
        Some(client.local_addr().unwrap().port())
    );

    for _ in 0..20 {
        let line = client.recv_line().unwrap().expect("sample line");
        let value = line.trim_end_matches('\n');
        let (int_part, frac_part) = value.split_once('.').expect("decimal point");
        assert!(int_part.bytes().all(|b| b.is_ascii_digit()), "{line:?}");
        assert_eq!(frac_part.len(), 5, "{line:?}");
        assert!(line.ends_with('\n'));
        assert!((value.parse::<f64>().unwrap() - MID_SCALE_VOLTS).abs() < 1e-5);
    }

    server.stop().unwrap();
}

#[test]
fn test_sample_rate_is_roughly_configured_rate() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut client = client_for(&server);
    client.subscribe().unwrap();

    let window = Duration::from_millis(500);
    let start = Instant::now();
    let mut received = 0;
    while start.elapsed() < window {
        if client.recv_sample().unwrap().is_some() {
            received += 1;
        }
    }

    // 2000 Hz nominal; loose bounds for loaded CI machines
    assert!(received > 200, "only {received} samples in {window:?}");
    assert!(received < 1500, "{received} samples in {window:?}");
    server.stop().unwrap();
}

#[test]
fn test_last_sender_wins() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut first = client_for(&server);
    let mut second = client_for(&server);

    first.subscribe().unwrap();
    assert!(first.recv_sample().unwrap().is_some());

    second.subscribe().unwrap();
    assert!(second.recv_sample().unwrap().is_some());

    // Whatever was in flight for the first client drains, then silence
    drain(&mut first, Duration::from_millis(100));
    first.set_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(first.recv_line().unwrap(), None);

    assert!(second.recv_sample().unwrap().is_some());
    assert_eq!(server.registry().generation(), 2);
    server.stop().unwrap();
}

#[test]
fn test_unknown_command_changes_nothing() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut client = client_for(&server);

    assert_eq!(client.request("ping\n").unwrap(), REPLY_UNKNOWN);
    assert_eq!(client.request("SEND\n").unwrap(), REPLY_UNKNOWN);

    assert!(!server.registry().is_registered());
    assert!(!server.shutdown_flag().is_stopping());
    client.set_timeout(Duration::from_millis(50)).unwrap();
    assert_eq!(client.recv_line().unwrap(), None);

    server.stop().unwrap();
}

#[test]
fn test_empty_datagram_gets_no_reply() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut client = client_for(&server);

    client.send_command("").unwrap();
    client.send_command("\r\n").unwrap();
    client.set_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(client.recv_line().unwrap(), None);
    assert_eq!(server.listener_state(), ListenerState::Listening);

    server.stop().unwrap();
}

#[test]
fn test_line_terminators_are_equivalent() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut client = client_for(&server);

    for command in ["send", "send\n", "send\r\n"] {
        assert_eq!(client.request(command).unwrap(), REPLY_STREAMING, "{command:?}");
    }
    assert_eq!(server.registry().generation(), 3);

    server.stop().unwrap();
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_stop_command_shuts_down_promptly() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut client = client_for(&server);
    client.subscribe().unwrap();

    assert_eq!(client.stop_server().unwrap(), REPLY_STOPPING);
    assert!(server.shutdown_flag().is_stopping());
    assert!(
        wait_until(Duration::from_millis(500), || server.listener_finished()),
        "listener still running after stop"
    );

    let started = Instant::now();
    server.stop().unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(server.sampler_state(), SamplerState::Stopped);
    assert_eq!(server.listener_state(), ListenerState::Stopped);

    // Stragglers may arrive, then the stream ends for good
    drain(&mut client, Duration::from_millis(100));
    assert_eq!(client.recv_line().unwrap(), None);
}

#[test]
fn test_request_stop_unblocks_idle_listener() {
    let mut server = start_server(MockAdc::new(MID_SCALE));

    let started = Instant::now();
    server.request_stop();
    assert!(wait_until(Duration::from_millis(500), || server
        .listener_finished()));
    server.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_stop_while_client_is_streaming() {
    for _ in 0..5 {
        let mut server = start_server(MockAdc::new(MID_SCALE));
        let mut client = client_for(&server);
        client.subscribe().unwrap();
        for _ in 0..20 {
            assert!(client.recv_sample().unwrap().is_some());
        }

        server.request_stop();
        assert!(wait_until(Duration::from_millis(500), || server
            .listener_finished()));
        server.stop().unwrap();
        assert_eq!(server.listener_state(), ListenerState::Stopped);
        assert_eq!(server.sampler_state(), SamplerState::Stopped);
    }
}

#[test]
fn test_port_reusable_after_stop() {
    let mut server = start_server(MockAdc::new(MID_SCALE));
    let mut client = client_for(&server);
    client.subscribe().unwrap();
    assert!(client.recv_sample().unwrap().is_some());

    let addr = server.local_addr();
    server.stop().unwrap();
    assert!(UdpSocket::bind(addr).is_ok());
}

#[test]
fn test_port_in_use_fails_startup() {
    let occupant = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.network.listen_address = occupant.local_addr().unwrap().to_string();

    let result = EcgServer::start_with_bus(config, MockAdc::new(MID_SCALE));
    assert!(matches!(result, Err(Error::Socket(_))));
}

// ============================================================================
// Sampling
// ============================================================================

#[test]
fn test_read_failures_do_not_stop_streaming() {
    let adc = MockAdc::new(MID_SCALE);
    adc.push_failures(5);
    let mut server = start_server(adc.clone());
    let mut client = client_for(&server);

    client.subscribe().unwrap();
    assert!(client.recv_sample().unwrap().is_some());

    let stats = server.sampler_stats();
    assert_eq!(stats.read_failures(), 5);
    assert!(stats.samples() > 0);
    assert!(adc.channels().iter().all(|&ch| ch == 1));

    server.stop().unwrap();
}
