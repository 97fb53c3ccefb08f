//! The server side: demultiplexes inbound datagrams into per-peer connections.
//!
//! 服务端：将入站数据报按对端分发到各个连接。

use super::packet_io::{PacketReader, Security};
use super::sender::{SEND_QUEUE_CAPACITY, SendCommand, sender_task};
use super::traits::{AsyncUdpSocket, DatagramSink};
use crate::config::Config;
use crate::core::connection::{ConnMetadata, Connection};
use crate::core::lock;
use crate::error::{Error, Result};
use crate::packet::Command;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const RECV_BUFFER_SIZE: usize = 64 * 1024;

type SessionKey = (SocketAddr, u16);

/// Accepts connections from many peers over one UDP socket.
///
/// Sessions are keyed by peer address and conversation id. Dropping the
/// listener closes it.
///
/// 通过一个 UDP 套接字接受来自多个对端的连接。
///
/// 会话以对端地址和会话 ID 为键。丢弃监听器会将其关闭。
pub struct Listener {
    shared: Arc<Shared>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    recv_task: JoinHandle<()>,
    sender_task: JoinHandle<()>,
}

struct Shared {
    local_addr: SocketAddr,
    config: Config,
    security: Security,
    reader: PacketReader,
    sessions: Mutex<HashMap<SessionKey, Connection>>,
    send_tx: mpsc::Sender<SendCommand>,
    accept_tx: mpsc::Sender<Connection>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.shared.local_addr)
            .field("sessions", &self.active_connections())
            .finish()
    }
}

impl Listener {
    /// Binds a UDP socket to `addr` and starts listening.
    ///
    /// 将 UDP 套接字绑定到 `addr` 并开始监听。
    pub async fn bind(addr: SocketAddr, config: Config, security: Security) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(addr).await?;
        Self::with_socket(socket, config, security)
    }

    /// Starts listening on an already bound socket.
    pub fn with_socket<S: AsyncUdpSocket>(
        socket: S,
        config: Config,
        security: Security,
    ) -> Result<Self> {
        config.validate()?;
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;

        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (accept_tx, accept_rx) = mpsc::channel(config.listener.accept_backlog);
        let shared = Arc::new(Shared {
            local_addr,
            reader: security.reader(),
            config,
            security,
            sessions: Mutex::new(HashMap::new()),
            send_tx,
            accept_tx,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        let sender_task = tokio::spawn(sender_task(socket.clone(), send_rx));
        let recv_task = tokio::spawn(recv_loop(socket, shared.clone()));
        info!(addr = %local_addr, "listener bound");

        Ok(Self {
            shared,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            recv_task,
            sender_task,
        })
    }

    /// Waits for the next new connection.
    ///
    /// Fails with [`Error::ListenerClosed`] once the listener is closed.
    ///
    /// 等待下一个新连接。监听器关闭后返回 [`Error::ListenerClosed`]。
    pub async fn accept(&self) -> Result<Connection> {
        let shutdown = self.shared.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::ListenerClosed);
        }

        let mut rx = self.accept_rx.lock().await;
        tokio::select! {
            conn = rx.recv() => conn.ok_or(Error::ListenerClosed),
            _ = &mut shutdown => Err(Error::ListenerClosed),
        }
    }

    /// Stops accepting, terminates every tracked connection and releases the socket.
    ///
    /// 停止接受连接，终止所有已跟踪的连接并释放套接字。
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.shutdown.notify_waiters();
        self.recv_task.abort();

        let sessions: Vec<Connection> = lock(&self.shared.sessions).values().cloned().collect();
        let count = sessions.len();
        for conn in sessions {
            conn.terminate();
        }
        lock(&self.shared.sessions).clear();
        self.sender_task.abort();
        info!(addr = %self.shared.local_addr, terminated = count, "listener closed");
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Number of connections currently tracked.
    pub fn active_connections(&self) -> usize {
        lock(&self.shared.sessions).len()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

async fn recv_loop<S: AsyncUdpSocket>(socket: Arc<S>, shared: Arc<Shared>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, addr)) => {
                shared.on_receive(Bytes::copy_from_slice(&buf[..len]), addr);
            }
            Err(e) => {
                warn!(addr = %shared.local_addr, "failed to receive datagram: {}", e);
            }
        }
    }
}

impl Shared {
    fn on_receive(self: &Arc<Self>, datagram: Bytes, addr: SocketAddr) {
        let len = datagram.len();
        let segments = self.reader.read(datagram);
        let Some(first) = segments.first() else {
            debug!(remote = %addr, len, "discarding datagram without valid segments");
            return;
        };
        let conversation = first.conversation();
        let key = (addr, conversation);

        let existing = lock(&self.sessions).get(&key).cloned();
        let conn = match existing {
            Some(conn) => conn,
            None => {
                if self.closed.load(Ordering::Acquire) || first.command() == Command::Terminate {
                    return;
                }
                self.open_session(key)
            }
        };
        conn.input(segments);
    }

    fn open_session(self: &Arc<Self>, key: SessionKey) -> Connection {
        let (remote_addr, conversation) = key;
        let sink = Arc::new(PeerSink {
            tx: self.send_tx.clone(),
            key,
            listener: Arc::downgrade(self),
        });
        let meta = ConnMetadata {
            local_addr: self.local_addr,
            remote_addr,
            conversation,
        };
        let conn = Connection::new(meta, self.security.writer(sink), &self.config);
        lock(&self.sessions).insert(key, conn.clone());
        info!(conv = conversation, remote = %remote_addr, "accepted new connection");

        match self.accept_tx.try_send(conn.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(conn)) => {
                // Wait for room off the receive path.
                let tx = self.accept_tx.clone();
                let timeout = self.config.listener.accept_timeout;
                tokio::spawn(async move {
                    if let Err(err) = tx.send_timeout(conn, timeout).await {
                        let conn = err.into_inner();
                        debug!(
                            conv = conn.conversation(),
                            remote = %conn.remote_addr(),
                            "accept queue full, dropping connection"
                        );
                        conn.terminate();
                    }
                });
            }
            Err(TrySendError::Closed(conn)) => conn.terminate(),
        }
        conn
    }

    fn remove(&self, key: &SessionKey) {
        if lock(&self.sessions).remove(key).is_some() {
            trace!(conv = key.1, remote = %key.0, "session removed");
        }
    }
}

/// The per-peer output of a listener connection.
struct PeerSink {
    tx: mpsc::Sender<SendCommand>,
    key: SessionKey,
    /// Only weak: the listener owns its sessions, not the other way around.
    listener: Weak<Shared>,
}

impl DatagramSink for PeerSink {
    fn send_datagram(&self, datagram: Bytes) -> Result<()> {
        let cmd = SendCommand {
            remote_addr: self.key.0,
            datagram,
        };
        match self.tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!(remote = %self.key.0, "send queue full, dropping datagram");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::ChannelClosed),
        }
    }

    fn close(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.remove(&self.key);
        }
    }
}
