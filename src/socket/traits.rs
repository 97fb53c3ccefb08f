//! Traits for abstracting over UDP socket implementations and datagram outputs.
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// An asynchronous UDP socket interface.
///
/// This trait allows for abstracting over the underlying UDP socket implementation,
/// enabling custom socket implementations for testing or other purposes.
///
/// 异步UDP套接字接口。
///
/// 此trait允许对底层UDP套接字实现进行抽象，从而可以为测试或其他目的自定义套接字实现。
#[async_trait]
pub trait AsyncUdpSocket: Send + Sync + 'static {
    /// Sends data on the socket to the given address.
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;

    /// Receives a single datagram on the socket.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Returns the local address that this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;
}

#[async_trait]
impl AsyncUdpSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        UdpSocket::send_to(self, buf, target).await.map_err(Into::into)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await.map_err(Into::into)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        UdpSocket::local_addr(self).map_err(Into::into)
    }
}

/// Where a single connection's finished datagrams go.
///
/// Implementations must not block: a connection writes from inside its flush,
/// and a datagram that cannot be queued right away may simply be dropped.
///
/// 单个连接的完整数据报的去向。
///
/// 实现不得阻塞：连接在刷新过程中写入，无法立即排队的数据报可以直接丢弃。
pub trait DatagramSink: Send + Sync + 'static {
    /// Queues one datagram towards the connection's peer.
    /// 将一个数据报排队发往连接的对端。
    fn send_datagram(&self, datagram: Bytes) -> Result<()>;

    /// Called once when the connection is terminated.
    /// 连接终止时调用一次。
    fn close(&self) {}
}
