//! tests/common/harness.rs
use kcp_transport::socket::Security;
use kcp_transport::{Config, Connection, Dialer, Listener};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "kcp_transport=info,lifecycle=info,transfer=info".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .try_init();
    });
}

/// Timeouts short enough for the close handshake to finish within a test.
pub fn fast_close_config() -> Config {
    let mut config = Config::default();
    config.lifecycle.ready_to_close_timeout = Duration::from_secs(2);
    config.lifecycle.peer_terminating_timeout = Duration::from_millis(300);
    config.lifecycle.terminating_timeout = Duration::from_millis(500);
    config.lifecycle.closing_keepalive_interval = Duration::from_millis(100);
    config
}

/// A listener on an ephemeral loopback port plus a dialer sharing its settings.
pub struct TestHarness {
    pub server_addr: SocketAddr,
    pub listener: Arc<Listener>,
    pub dialer: Dialer,
}

impl TestHarness {
    pub async fn new(config: Config, security: Security) -> Self {
        init_tracing();
        let listener = Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            config.clone(),
            security.clone(),
        )
        .await
        .expect("Failed to bind listener");
        let dialer = Dialer::new(config, security).expect("Failed to create dialer");
        Self {
            server_addr: listener.local_addr(),
            listener: Arc::new(listener),
            dialer,
        }
    }

    pub async fn connect(&self) -> Connection {
        self.dialer
            .dial(self.server_addr)
            .await
            .expect("Client dial failed")
    }

    /// Accepts connections forever, answering each with `echo_server_handler`.
    pub fn spawn_echo_server(&self) -> JoinHandle<()> {
        let listener = self.listener.clone();
        tokio::spawn(async move {
            let mut id = 0;
            while let Ok(conn) = listener.accept().await {
                tokio::spawn(echo_server_handler(conn, id));
                id += 1;
            }
        })
    }
}

/// Reads exactly `len` bytes or panics on end of stream.
pub async fn read_exact(conn: &Connection, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; 8192];
    while out.len() < len {
        let want = (len - out.len()).min(buf.len());
        let n = conn.read(&mut buf[..want]).await.expect("read failed");
        assert!(n > 0, "stream ended after {} of {} bytes", out.len(), len);
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Reads a length-prefixed message and writes it back.
pub async fn echo_server_handler(conn: Connection, id: usize) {
    let header = read_exact(&conn, 4).await;
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let payload = read_exact(&conn, len).await;
    tracing::info!(
        "[Server Handler {} for {}] Read {} bytes.",
        id,
        conn.remote_addr(),
        payload.len()
    );
    conn.write(&payload)
        .await
        .expect("Server handler failed to echo data");
}

/// Sends a length-prefixed payload and verifies the echo.
pub async fn client_echo_task(conn: Connection, payload: Vec<u8>, id: usize) {
    let mut message = (payload.len() as u32).to_be_bytes().to_vec();
    message.extend_from_slice(&payload);
    conn.write(&message)
        .await
        .expect("Client failed to write payload");
    tracing::info!("[Client {}] Sent {} bytes.", id, payload.len());

    let response = read_exact(&conn, payload.len()).await;
    assert_eq!(response, payload);
    tracing::info!("[Client {}] Received correct echo response.", id);
}

/// Polls `cond` every 20 ms until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            limit
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
