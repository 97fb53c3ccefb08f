//! The client side: opens connections to a remote listener.
//!
//! 客户端：向远程监听器发起连接。

use super::packet_io::{PacketReader, Security};
use super::sender::{SEND_QUEUE_CAPACITY, SendCommand, sender_task};
use super::traits::{AsyncUdpSocket, DatagramSink};
use crate::config::Config;
use crate::core::connection::{ConnMetadata, Connection, State};
use crate::core::lock;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace};

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Opens connections, each over its own UDP socket.
///
/// Conversation ids come from a counter seeded randomly per dialer.
///
/// 发起连接，每个连接使用独立的 UDP 套接字。会话 ID 来自每个拨号器随机初始化的计数器。
#[derive(Debug)]
pub struct Dialer {
    config: Config,
    security: Security,
    next_conversation: AtomicU16,
}

impl Dialer {
    pub fn new(config: Config, security: Security) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            security,
            next_conversation: AtomicU16::new(rand::random()),
        })
    }

    /// Binds an ephemeral UDP socket and opens a connection to `remote`.
    ///
    /// 绑定一个临时 UDP 套接字并向 `remote` 发起连接。
    pub async fn dial(&self, remote: SocketAddr) -> Result<Connection> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        self.dial_with_socket(socket, remote)
    }

    /// Opens a connection to `remote` over an already bound socket. The socket
    /// is released when the connection terminates and is dropped.
    ///
    /// 通过已绑定的套接字向 `remote` 发起连接。连接终止并被丢弃后释放套接字。
    pub fn dial_with_socket<S: AsyncUdpSocket>(
        &self,
        socket: S,
        remote: SocketAddr,
    ) -> Result<Connection> {
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;
        let conversation = self.next_conversation.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        tokio::spawn(sender_task(socket.clone(), rx));

        let sink = Arc::new(DialerSink {
            tx,
            remote,
            closed: AtomicBool::new(false),
            pump: Mutex::new(None),
        });
        let meta = ConnMetadata {
            local_addr,
            remote_addr: remote,
            conversation,
        };
        let conn = Connection::new(meta, self.security.writer(sink.clone()), &self.config);

        let pump = tokio::spawn(recv_pump(
            socket,
            remote,
            self.security.reader(),
            conn.clone(),
        ));
        sink.attach(pump.abort_handle());

        info!(conv = conversation, remote = %remote, local = %local_addr, "dialed connection");
        Ok(conn)
    }
}

/// Feeds datagrams from `remote` into the connection until aborted.
async fn recv_pump<S: AsyncUdpSocket>(
    socket: Arc<S>,
    remote: SocketAddr,
    reader: PacketReader,
    conn: Connection,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                if from != remote {
                    trace!(from = %from, "ignoring datagram from unexpected peer");
                    continue;
                }
                let segments = reader.read(Bytes::copy_from_slice(&buf[..len]));
                if segments.is_empty() {
                    debug!(remote = %remote, len, "discarding datagram without valid segments");
                    continue;
                }
                conn.input(segments);
            }
            Err(e) => {
                debug!(remote = %remote, "failed to receive datagram: {}", e);
                if conn.state() == State::Terminated {
                    return;
                }
            }
        }
    }
}

struct DialerSink {
    tx: mpsc::Sender<SendCommand>,
    remote: SocketAddr,
    closed: AtomicBool,
    pump: Mutex<Option<AbortHandle>>,
}

impl DialerSink {
    fn attach(&self, pump: AbortHandle) {
        if self.closed.load(Ordering::Acquire) {
            pump.abort();
            return;
        }
        *lock(&self.pump) = Some(pump);
        // Closed while attaching.
        if self.closed.load(Ordering::Acquire) {
            if let Some(pump) = lock(&self.pump).take() {
                pump.abort();
            }
        }
    }
}

impl DatagramSink for DialerSink {
    fn send_datagram(&self, datagram: Bytes) -> Result<()> {
        let cmd = SendCommand {
            remote_addr: self.remote,
            datagram,
        };
        match self.tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!(remote = %self.remote, "send queue full, dropping datagram");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::ChannelClosed),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }
}
