//! Delivery tests: ordering, loss recovery and flow control.

use crate::core::connection::{ConnMetadata, Connection, State};
use crate::core::test_utils::{
    LinkFilter, capture_sink, client_addr, deliver_all, drop_every, init_tracing, linked_pair,
    linked_pair_with_filter, read_exact, server_addr,
};
use crate::{config::Config, error::Error, packet::Segment, socket::Security};
use sha2::{Digest, Sha256};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::time::{Instant, sleep};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn wait_until_acknowledged(conn: &Connection) {
    while !conn.is_send_window_empty() {
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_small_message_round_trip() {
    let pair = linked_pair(Config::default());
    pair.client.write(b"hello").await.unwrap();
    assert_eq!(read_exact(&pair.server, 5).await, b"hello");

    pair.server.write(b"world").await.unwrap();
    assert_eq!(read_exact(&pair.client, 5).await, b"world");

    wait_until_acknowledged(&pair.client).await;
    wait_until_acknowledged(&pair.server).await;
    assert_eq!(pair.client.state(), State::Active);
    assert_eq!(pair.server.state(), State::Active);
}

#[tokio::test(start_paused = true)]
async fn test_bidirectional_exchange() {
    let pair = linked_pair(Config::default());
    let up = pattern(50_000);
    let down: Vec<u8> = up.iter().rev().copied().collect();

    let client = pair.client.clone();
    let up_data = up.clone();
    let writer = tokio::spawn(async move { client.write(&up_data).await });
    let server = pair.server.clone();
    let down_data = down.clone();
    let reverse = tokio::spawn(async move { server.write(&down_data).await });

    let received_up = read_exact(&pair.server, up.len()).await;
    let received_down = read_exact(&pair.client, down.len()).await;
    assert_eq!(writer.await.unwrap().unwrap(), up.len());
    assert_eq!(reverse.await.unwrap().unwrap(), down.len());
    assert_eq!(received_up, up);
    assert_eq!(received_down, down);
}

#[tokio::test(start_paused = true)]
async fn test_large_transfer_over_lossy_link() {
    let pair = linked_pair_with_filter(Config::default(), drop_every(5), drop_every(5));
    let data = pattern(1024 * 1024);
    let expected = Sha256::digest(&data);

    let client = pair.client.clone();
    let len = data.len();
    let writer = tokio::spawn(async move { client.write(&data).await });

    let received = read_exact(&pair.server, len).await;
    assert_eq!(writer.await.unwrap().unwrap(), len);
    assert_eq!(Sha256::digest(&received), expected);

    assert!(pair.client_sink.dropped.load(Ordering::SeqCst) > 0);
    assert!(pair.server_sink.dropped.load(Ordering::SeqCst) > 0);
    wait_until_acknowledged(&pair.client).await;
}

#[tokio::test(start_paused = true)]
async fn test_lost_first_segment_is_retransmitted_in_order() {
    let lost = Arc::new(AtomicBool::new(false));
    let lost_flag = lost.clone();
    let drop_first_data: LinkFilter = Arc::new(move |_: usize, segments: &[Segment]| {
        let first_data = matches!(segments.first(), Some(Segment::Data(seg)) if seg.number == 0);
        !(first_data && !lost_flag.swap(true, Ordering::SeqCst))
    });
    let pair = linked_pair_with_filter(Config::default(), drop_first_data, deliver_all());

    let data = pattern(10_000);
    pair.client.write(&data).await.unwrap();
    assert_eq!(read_exact(&pair.server, data.len()).await, data);
    assert!(lost.load(Ordering::SeqCst));
    // Number 0 went out at least twice.
    let copies = pair
        .client_sink
        .count(|s| matches!(s, Segment::Data(seg) if seg.number == 0));
    assert!(copies >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_read_chunks_returns_whole_segments() {
    let pair = linked_pair(Config::default());
    let mss = pair.client.mss();
    let data = pattern(mss * 2 + 10);
    pair.client.write(&data).await.unwrap();

    let mut received = Vec::new();
    while received.len() < data.len() {
        let chunks = pair.server.read_chunks().await.unwrap();
        assert!(!chunks.is_empty());
        for chunk in chunks {
            assert!(chunk.len() <= mss);
            received.extend_from_slice(&chunk);
        }
    }
    assert_eq!(received, data);
}

#[tokio::test(start_paused = true)]
async fn test_read_deadline_times_out_without_closing() {
    let pair = linked_pair(Config::default());
    pair.server
        .set_read_deadline(Some(Instant::now() + Duration::from_millis(200)));

    let mut buf = [0u8; 16];
    assert!(matches!(
        pair.server.read(&mut buf).await,
        Err(Error::Timeout)
    ));
    assert_eq!(pair.server.state(), State::Active);

    // A cleared deadline makes reads block again until data arrives.
    pair.server.set_read_deadline(None);
    pair.client.write(b"late").await.unwrap();
    assert_eq!(read_exact(&pair.server, 4).await, b"late");
}

#[tokio::test(start_paused = true)]
async fn test_write_blocks_when_window_full() {
    init_tracing();
    let (sink, rx) = capture_sink();
    std::mem::forget(rx);
    let mut config = Config::default();
    config.transport.write_buffer_size = 1;
    let conn = Connection::new(
        ConnMetadata {
            local_addr: client_addr(),
            remote_addr: server_addr(),
            conversation: 7,
        },
        Security::none().writer(sink),
        &config,
    );
    conn.set_write_deadline(Some(Instant::now() + Duration::from_secs(1)));

    // Nothing is ever acknowledged, so only one window's worth is queued.
    let data = pattern(2 * 1024 * 1024);
    let queued = conn.write(&data).await.unwrap();
    assert!(queued > 0 && queued < data.len(), "queued {}", queued);
    assert_eq!(queued % conn.mss(), 0);

    assert!(matches!(conn.write(&data).await, Err(Error::Timeout)));
    assert_eq!(conn.state(), State::Active);
}

#[tokio::test(start_paused = true)]
async fn test_pending_read_wakes_on_data() {
    let pair = linked_pair(Config::default());
    let server = pair.server.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 32];
        let n = server.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    });
    sleep(Duration::from_millis(500)).await;
    assert!(!reader.is_finished());

    pair.client.write(b"wake").await.unwrap();
    assert_eq!(reader.await.unwrap(), b"wake");
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_estimate_stays_bounded() {
    let pair = linked_pair(Config::default());
    for _ in 0..20 {
        pair.client.write(&pattern(4000)).await.unwrap();
        read_exact(&pair.server, 4000).await;
    }
    wait_until_acknowledged(&pair.client).await;
    // Acks leave within one flush interval on a lossless link.
    assert!(pair.client.smoothed_rtt() <= Duration::from_millis(100));
    assert!(pair.client.rto() <= Duration::from_millis(1000));
}
