//! Bulk and concurrent transfers over loopback UDP.

pub mod common;

use common::harness::{TestHarness, client_echo_task, read_exact};
use futures::future::join_all;
use kcp_transport::Config;
use kcp_transport::socket::{AesGcmSealer, Security, Srtp};
use std::time::Duration;

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[tokio::test]
async fn test_concurrent_echo_clients() {
    let harness = TestHarness::new(Config::default(), Security::none()).await;
    let _server = harness.spawn_echo_server();

    let mut clients = Vec::new();
    for id in 0..8 {
        let conn = harness.connect().await;
        clients.push(client_echo_task(conn, payload(64 * 1024, id as u8), id));
    }
    tokio::time::timeout(Duration::from_secs(20), join_all(clients))
        .await
        .expect("echo clients timed out");
    assert_eq!(harness.listener.active_connections(), 8);
}

#[tokio::test]
async fn test_sealed_bulk_transfer() {
    let security = Security::none()
        .with_header(Srtp::new())
        .with_sealer(AesGcmSealer::new(b"integration"));
    let harness = TestHarness::new(Config::default(), security).await;

    let client = harness.connect().await;
    let data = payload(2 * 1024 * 1024, 7);
    let writer = {
        let client = client.clone();
        let data = data.clone();
        tokio::spawn(async move { client.write(&data).await })
    };

    let server = harness.listener.accept().await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(30), read_exact(&server, data.len()))
        .await
        .expect("transfer timed out");
    assert_eq!(writer.await.unwrap().unwrap(), data.len());
    assert!(received == data, "payload corrupted in transit");
}

#[tokio::test]
async fn test_congestion_control_transfer() {
    let mut config = Config::default();
    config.reliability.congestion = true;
    let harness = TestHarness::new(config, Security::none()).await;
    let _server = harness.spawn_echo_server();

    let conn = harness.connect().await;
    tokio::time::timeout(
        Duration::from_secs(20),
        client_echo_task(conn, payload(512 * 1024, 3), 0),
    )
    .await
    .expect("echo timed out");
}
