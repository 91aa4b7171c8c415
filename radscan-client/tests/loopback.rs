//! End-to-end tests against a loopback mock radar.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use radscan_client::client::ColossusTcpClient;
use radscan_client::event::ClientEvent;
use radscan_client::server::ColossusTcpServer;
use radscan_core::config::{RadarConfig, RotationTracker, SweepCounter};
use radscan_core::protocol::colossus::tcp::{
    encode_configuration, encode_fft_data, ConfigurationView, FftDataView, TcpMessageType,
};

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

/// Start a mock radar on an ephemeral port. It answers a
/// configuration request with its configuration, the way the real
/// radar describes itself to every client. Returns the server, its
/// address, and a counter of accepted client connections.
async fn start_mock_radar(
    config: RadarConfig,
) -> (ColossusTcpServer, SocketAddrV4, Arc<AtomicUsize>) {
    let mut server = ColossusTcpServer::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

    server.set_handler(
        TcpMessageType::ConfigurationRequest,
        move |radar, id, _msg| {
            radar.send(id, encode_configuration(&config, &[]));
        },
    );

    let connections = Arc::new(AtomicUsize::new(0));
    let connections_clone = connections.clone();
    server.events().attach(move |event| {
        if matches!(event, ClientEvent::Connected(_)) {
            connections_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    server.start().await.expect("mock radar failed to bind");
    let addr = server.local_addr().expect("server has a local address");
    (server, addr, connections)
}


/// Count `Connected` events on a client's own event dispatcher, so a
/// test can wait for the client-side connection entry to exist before
/// sending through it.
fn count_connections(client: &ColossusTcpClient) -> Arc<AtomicUsize> {
    let connected = Arc::new(AtomicUsize::new(0));
    let connected_clone = connected.clone();
    client.events().attach(move |event| {
        if matches!(event, ClientEvent::Connected(_)) {
            connected_clone.fetch_add(1, Ordering::SeqCst);
        }
    });
    connected
}

#[tokio::test]
async fn test_configuration_first() {
    let config = RadarConfig {
        azimuth_samples: 400,
        encoder_size: 5600,
        bin_size: 1752,
        range_in_bins: 2856,
        range_gain: 1.0,
        range_offset: 0.0,
        ..Default::default()
    };
    let (mut server, addr, connections) = start_mock_radar(config).await;

    let mut client = ColossusTcpClient::new(addr);

    let seen_config = Arc::new(Mutex::new(None));
    let other_handlers = Arc::new(AtomicUsize::new(0));

    let seen_clone = seen_config.clone();
    client.set_handler(TcpMessageType::Configuration, move |_, _, msg| {
        let view = ConfigurationView::new(&msg).unwrap();
        *seen_clone.lock().unwrap() = Some((
            view.azimuth_samples(),
            view.encoder_size(),
            view.bin_size(),
            view.range_in_bins(),
            view.range_gain(),
            view.range_offset(),
        ));
    });
    let other_clone = other_handlers.clone();
    client.set_handler(TcpMessageType::FftData, move |_, _, _| {
        other_clone.fetch_add(1, Ordering::SeqCst);
    });

    let client_up = count_connections(&client);
    client.start().await.unwrap();
    wait_until(|| connections.load(Ordering::SeqCst) == 1).await;
    wait_until(|| client_up.load(Ordering::SeqCst) == 1).await;

    // Ask the radar for its configuration
    client
        .send_type(TcpMessageType::ConfigurationRequest)
        .unwrap();

    wait_until(|| seen_config.lock().unwrap().is_some()).await;
    client.stop().await;
    server.stop().await;

    let seen = seen_config.lock().unwrap().unwrap();
    assert_eq!(seen, (400, 5600, 1752, 2856, 1.0, 0.0));
    // No other handler fired
    assert_eq!(other_handlers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lost_packet_detection_is_user_side() {
    let (mut server, addr, connections) = start_mock_radar(RadarConfig::default()).await;

    let mut client = ColossusTcpClient::new(addr);

    let received = Arc::new(Mutex::new(Vec::new()));
    let gaps = Arc::new(Mutex::new(Vec::new()));

    let received_clone = received.clone();
    let gaps_clone = gaps.clone();
    let mut sweeps = SweepCounter::new();
    client.set_handler(TcpMessageType::FftData, move |_, _, msg| {
        let view = FftDataView::new(&msg).unwrap();
        received_clone.lock().unwrap().push(view.sweep_counter());
        if let Some(gap) = sweeps.update(view.sweep_counter()) {
            gaps_clone.lock().unwrap().push((gap.previous, gap.current));
        }
    });

    let client_up = count_connections(&client);
    client.start().await.unwrap();
    wait_until(|| connections.load(Ordering::SeqCst) == 1).await;
    wait_until(|| client_up.load(Ordering::SeqCst) == 1).await;

    // Sweep counters 100, 101, 103: one packet lost upstream
    for sweep in [100u16, 101, 103] {
        server
            .broadcast(encode_fft_data(sweep, 0, 0, 0, &[0u8; 16]))
            .unwrap();
    }

    wait_until(|| received.lock().unwrap().len() == 3).await;
    client.stop().await;
    server.stop().await;

    // The library delivered all three messages, 103 included; the gap
    // is the user's observation
    assert_eq!(*received.lock().unwrap(), vec![100, 101, 103]);
    assert_eq!(*gaps.lock().unwrap(), vec![(101, 103)]);
}

#[tokio::test]
async fn test_full_rotation_signals_once() {
    let (mut server, addr, connections) = start_mock_radar(RadarConfig::default()).await;

    let mut client = ColossusTcpClient::new(addr);

    let rotations = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));

    let rotations_clone = rotations.clone();
    let received_clone = received.clone();
    let mut tracker = RotationTracker::new();
    client.set_handler(TcpMessageType::FftData, move |_, _, msg| {
        let view = FftDataView::new(&msg).unwrap();
        received_clone.fetch_add(1, Ordering::SeqCst);
        if tracker.update(view.azimuth()) {
            rotations_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    let client_up = count_connections(&client);
    client.start().await.unwrap();
    wait_until(|| connections.load(Ordering::SeqCst) == 1).await;
    wait_until(|| client_up.load(Ordering::SeqCst) == 1).await;

    // A full rotation 0..5599, then the wrap back to zero
    let total = 5600usize + 1;
    for azimuth in (0..5600u16).chain([0]) {
        server
            .broadcast(encode_fft_data(azimuth, azimuth, 0, 0, &[]))
            .unwrap();
    }

    wait_until(|| received.load(Ordering::SeqCst) == total).await;
    client.stop().await;
    server.stop().await;

    assert_eq!(rotations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_stop_idempotence() {
    let (mut server, addr, _connections) = start_mock_radar(RadarConfig::default()).await;

    let mut client = ColossusTcpClient::new(addr);
    client.ignore(TcpMessageType::KeepAlive);

    // start-stop twice is equivalent to once: no panics, no residue
    for _ in 0..2 {
        client.start().await.unwrap();
        // double start is a no-op
        client.start().await.unwrap();
        assert!(client.is_running());
        client.stop().await;
        client.stop().await;
        assert!(!client.is_running());
    }

    // send after stop reports NotRunning rather than hanging
    assert!(client.send_type(TcpMessageType::StartFftData).is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_client_reconnects_after_server_restart() {
    let config = RadarConfig::default();
    let (mut server, addr, connections) = start_mock_radar(config.clone()).await;

    let mut client = ColossusTcpClient::new(addr);
    let configs = Arc::new(AtomicUsize::new(0));
    let configs_clone = configs.clone();
    client.set_handler(TcpMessageType::Configuration, move |_, _, _| {
        configs_clone.fetch_add(1, Ordering::SeqCst);
    });

    let client_up = count_connections(&client);
    client.start().await.unwrap();
    wait_until(|| connections.load(Ordering::SeqCst) == 1).await;
    wait_until(|| client_up.load(Ordering::SeqCst) == 1).await;
    client
        .send_type(TcpMessageType::ConfigurationRequest)
        .unwrap();
    wait_until(|| configs.load(Ordering::SeqCst) == 1).await;

    // Bounce the server on the same port
    server.stop().await;
    let (mut server, _, reconnections) = {
        let mut server = ColossusTcpServer::new(addr);
        let config_clone = config.clone();
        server.set_handler(
            TcpMessageType::ConfigurationRequest,
            move |radar, id, _msg| {
                radar.send(id, encode_configuration(&config_clone, &[]));
            },
        );
        let reconnections = Arc::new(AtomicUsize::new(0));
        let reconnections_clone = reconnections.clone();
        server.events().attach(move |event| {
            if matches!(event, ClientEvent::Connected(_)) {
                reconnections_clone.fetch_add(1, Ordering::SeqCst);
            }
        });
        server.start().await.unwrap();
        (server, addr, reconnections)
    };

    // The client notices the drop and reconnects by itself
    wait_until(|| reconnections.load(Ordering::SeqCst) == 1).await;
    wait_until(|| client_up.load(Ordering::SeqCst) == 2).await;
    client
        .send_type(TcpMessageType::ConfigurationRequest)
        .unwrap();
    wait_until(|| configs.load(Ordering::SeqCst) >= 2).await;

    client.stop().await;
    server.stop().await;
}
