use std::sync::Arc;
use std::time::Duration;

use rover_gateway::clients::survive::{SurviveConfig, SurviveConnector};
use rover_gateway::clients::{ClientState, ClientTiming, ReconnectingClient};
use rover_gateway::gateway::{Gateway, GatewayOptions, SourceKind};
use rover_gateway::sensors::{HardwarePacket, LoggingLink};
use rover_gateway::state::SharedState;
use rover_gateway::types::{FixQuality, GpsFix, RawTelemetry};
use rover_gateway::GatewayError;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

fn options(dir: &TempDir) -> GatewayOptions {
    GatewayOptions {
        config_dir: dir.path().to_path_buf(),
        log_dir: dir.path().join("logs"),
        ..Default::default()
    }
}

fn packet(t: f64, gps: Option<GpsFix>) -> HardwarePacket {
    HardwarePacket {
        telemetry: RawTelemetry {
            battery: 90,
            voltage: 12.3,
            accels: vec![[0.0, 0.0, 9.81]; 2],
            gyros: vec![[0.0, 0.0, 0.0]; 2],
            rpms: vec![vec![30.0, 30.0]],
            timestamp: t,
            ..Default::default()
        },
        gps,
        calibration: None,
        captured_at: t,
    }
}

#[tokio::test]
async fn ingest_then_snapshot() {
    let dir = TempDir::new().unwrap();
    let gw = Gateway::new(options(&dir), Arc::new(LoggingLink)).unwrap();
    assert!(matches!(gw.snapshot(), Err(GatewayError::Unavailable(_))));

    let fix = GpsFix {
        latitude: 48.8584,
        longitude: 2.2945,
        satellites: 14,
        fix_quality: FixQuality::RtkFixed,
        hdop: 0.7,
        timestamp: 1.0,
        ..Default::default()
    };
    gw.ingest(packet(0.0, Some(fix)));
    for i in 1..100 {
        gw.ingest(packet(i as f64 * 0.02, None));
    }

    let data = gw.snapshot().unwrap();
    assert_eq!(data.battery, 90);
    assert!(data.est_initialized);
    assert!(data.odom_x > 0.0);
    assert!(data.est_x > 0.0);
    assert!((data.est_lat - 48.8584).abs() < 1e-4);
    assert!(data.roll.abs() < 1.0);
    assert_eq!(data.fix_quality, 4);
}

#[tokio::test]
async fn simulated_gateway_broadcasts_to_subscribers() {
    let dir = TempDir::new().unwrap();
    let gw = Arc::new(
        Gateway::new(
            GatewayOptions {
                source: SourceKind::Simulated,
                broadcast_interval: Duration::from_millis(50),
                ..options(&dir)
            },
            Arc::new(LoggingLink),
        )
        .unwrap(),
    );
    let (_id, mut rx) = gw.registry.register_with_capacity(256);
    gw.spawn_background();

    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no broadcast within 5s")
        .expect("subscriber dropped");
    let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert!(json["battery"].as_u64().unwrap() > 0);
    assert_eq!(json["rtk"]["enabled"], false);

    let names: Vec<String> = gw.status().tasks.into_iter().map(|t| t.name).collect();
    for expected in ["hardware", "stats", "broadcast", "network"] {
        assert!(names.iter().any(|n| n == expected), "missing task {}", expected);
    }
    gw.shutdown().await;
}

#[tokio::test]
async fn disabled_client_never_connects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ReconnectingClient::new(
        SurviveConnector::new(Arc::new(SharedState::default())),
        SurviveConfig {
            enabled: false,
            port,
            ..Default::default()
        },
        ClientTiming::default(),
    );
    client.start();

    let accepted = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(accepted.is_err());
    assert_eq!(client.state(), ClientState::Disabled);
}

#[tokio::test]
async fn client_reconnects_after_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (accepted_tx, mut accepted_rx) = tokio::sync::mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        for n in 0..2 {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"{\"device\":\"T20\",\"x\":1,\"y\":0,\"z\":0,\"qw\":1,\"qx\":0,\"qy\":0,\"qz\":0,\"timestamp\":1}\n")
                .await
                .unwrap();
            accepted_tx.send(n).unwrap();
            // First connection drops right away, second stays up
            if n == 1 {
                held.push(sock);
            }
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(held);
    });

    let state = Arc::new(SharedState::default());
    let client = ReconnectingClient::new(
        SurviveConnector::new(Arc::clone(&state)),
        SurviveConfig {
            enabled: true,
            port,
            ..Default::default()
        },
        ClientTiming {
            backoff: Duration::from_millis(100),
            ..Default::default()
        },
    );
    client.start();

    for expected in 0..2 {
        let n = tokio::time::timeout(Duration::from_secs(5), accepted_rx.recv())
            .await
            .expect("client did not (re)connect")
            .unwrap();
        assert_eq!(n, expected);
    }

    let mut connected = false;
    for _ in 0..100 {
        if client.state() == ClientState::Connected {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected);
    assert!(state.survive_pose.get().is_some());
    // A successful connection clears the retry counter
    assert_eq!(client.status().retry_count, 0);

    client.disable();
    for _ in 0..100 {
        if client.state() == ClientState::Disabled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(client.state(), ClientState::Disabled);
    server.abort();
}
