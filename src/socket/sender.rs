//! The dedicated task for sending UDP datagrams.

use super::traits::AsyncUdpSocket;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Capacity of a socket's outgoing datagram queue. Datagrams beyond it are
/// dropped by the writers.
pub(crate) const SEND_QUEUE_CAPACITY: usize = 1024;
const MAX_BATCH_SIZE: usize = 64;

/// A datagram ready to leave the socket.
#[derive(Debug)]
pub(crate) struct SendCommand {
    pub remote_addr: SocketAddr,
    pub datagram: Bytes,
}

/// Drains the queue into the socket. This centralizes all writes to the socket;
/// the task ends once every sender is dropped.
///
/// 将队列中的数据报写入套接字。所有对套接字的写入都集中在这里；所有发送方被丢弃后任务结束。
pub(crate) async fn sender_task<S: AsyncUdpSocket>(
    socket: Arc<S>,
    mut rx: mpsc::Receiver<SendCommand>,
) {
    let mut commands = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        // Wait for the first command to arrive.
        let Some(first) = rx.recv().await else {
            trace!("sender task stopping: queue closed");
            return;
        };
        commands.push(first);

        // Drain whatever else is already queued to process in a batch.
        while commands.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(cmd) => commands.push(cmd),
                Err(_) => break,
            }
        }

        for cmd in commands.drain(..) {
            if let Err(e) = socket.send_to(&cmd.datagram, cmd.remote_addr).await {
                warn!(addr = %cmd.remote_addr, "failed to send datagram: {}", e);
            }
        }
    }
}
