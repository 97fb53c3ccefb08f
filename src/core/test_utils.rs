//! Common testing infrastructure for connection tests.

use super::connection::{ConnMetadata, Connection};
use crate::{
    config::Config,
    error::Result,
    packet::Segment,
    socket::{DatagramSink, Security},
};
use bytes::Bytes;
use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;

/// Decides whether the `n`-th datagram sent on a link is delivered.
pub type LinkFilter = Arc<dyn Fn(usize, &[Segment]) -> bool + Send + Sync>;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "kcp_transport=info".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn deliver_all() -> LinkFilter {
    Arc::new(|_, _| true)
}

/// Drops every `n`-th datagram.
pub fn drop_every(n: usize) -> LinkFilter {
    Arc::new(move |i, _| (i + 1) % n != 0)
}

/// One direction of an in-memory datagram link.
///
/// Datagrams pass the filter on send and are recorded as decoded segments so
/// tests can inspect the traffic.
pub struct LinkSink {
    tx: mpsc::UnboundedSender<Bytes>,
    filter: LinkFilter,
    pub sent: AtomicUsize,
    pub dropped: AtomicUsize,
    pub log: Mutex<Vec<Segment>>,
    pub closed: AtomicUsize,
}

impl DatagramSink for LinkSink {
    fn send_datagram(&self, datagram: Bytes) -> Result<()> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst);
        let segments = Segment::decode_all(datagram.clone());
        self.log.lock().unwrap().extend(segments.iter().cloned());
        if (self.filter)(n, &segments) {
            let _ = self.tx.send(datagram);
        } else {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl LinkSink {
    /// Segments sent so far matching `pred`.
    pub fn count(&self, pred: impl Fn(&Segment) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|s| pred(s)).count()
    }
}

/// Two connections joined by an in-memory link.
pub struct LinkedPair {
    pub client: Connection,
    pub server: Connection,
    pub client_sink: Arc<LinkSink>,
    pub server_sink: Arc<LinkSink>,
}

pub fn client_addr() -> SocketAddr {
    "127.0.0.1:1234".parse().unwrap()
}

pub fn server_addr() -> SocketAddr {
    "127.0.0.1:5678".parse().unwrap()
}

/// Sets up a connected pair with a filter on each direction.
pub fn linked_pair_with_filter(
    config: Config,
    client_filter: LinkFilter,
    server_filter: LinkFilter,
) -> LinkedPair {
    init_tracing();
    let security = Security::none();
    let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

    let client_sink = Arc::new(new_sink(to_server_tx, client_filter));
    let server_sink = Arc::new(new_sink(to_client_tx, server_filter));

    let client = Connection::new(
        ConnMetadata {
            local_addr: client_addr(),
            remote_addr: server_addr(),
            conversation: 42,
        },
        security.writer(client_sink.clone()),
        &config,
    );
    let server = Connection::new(
        ConnMetadata {
            local_addr: server_addr(),
            remote_addr: client_addr(),
            conversation: 42,
        },
        security.writer(server_sink.clone()),
        &config,
    );

    spawn_pump(to_server_rx, server.clone(), &security);
    spawn_pump(to_client_rx, client.clone(), &security);

    LinkedPair {
        client,
        server,
        client_sink,
        server_sink,
    }
}

pub fn linked_pair(config: Config) -> LinkedPair {
    linked_pair_with_filter(config, deliver_all(), deliver_all())
}

fn new_sink(tx: mpsc::UnboundedSender<Bytes>, filter: LinkFilter) -> LinkSink {
    LinkSink {
        tx,
        filter,
        sent: AtomicUsize::new(0),
        dropped: AtomicUsize::new(0),
        log: Mutex::new(Vec::new()),
        closed: AtomicUsize::new(0),
    }
}

fn spawn_pump(mut rx: mpsc::UnboundedReceiver<Bytes>, conn: Connection, security: &Security) {
    let reader = security.reader();
    tokio::spawn(async move {
        while let Some(datagram) = rx.recv().await {
            let segments = reader.read(datagram);
            if !segments.is_empty() {
                conn.input(segments);
            }
        }
    });
}

/// A sink that only records, for driving a single connection by hand.
pub fn capture_sink() -> (Arc<LinkSink>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(new_sink(tx, deliver_all())), rx)
}

/// Reads until end of stream.
pub async fn read_to_end(conn: &Connection) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = conn.read(&mut buf).await.unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Reads exactly `len` bytes.
pub async fn read_exact(conn: &Connection, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; 4096];
    while out.len() < len {
        let want = (len - out.len()).min(buf.len());
        let n = conn.read(&mut buf[..want]).await.unwrap();
        assert!(n > 0, "stream ended after {} of {} bytes", out.len(), len);
        out.extend_from_slice(&buf[..n]);
    }
    out
}
