//! Serializes outgoing segments and hands them to the packet writer.
//! 序列化待发送的分段并交给数据包写入器。

use super::lock;
use crate::packet::WireSegment;
use crate::socket::PacketWriter;
use bytes::BytesMut;
use std::sync::Mutex;
use tracing::debug;

/// One segment per datagram, serialized through a reused buffer.
///
/// 每个数据报一个分段，通过复用的缓冲区序列化。
#[derive(Debug)]
pub struct SegmentWriter {
    writer: PacketWriter,
    buffer: Mutex<BytesMut>,
}

impl SegmentWriter {
    pub fn new(writer: PacketWriter, mtu: usize) -> Self {
        Self {
            writer,
            buffer: Mutex::new(BytesMut::with_capacity(mtu)),
        }
    }

    /// Writes one segment. Failures are logged and dropped; retransmission
    /// recovers lost data.
    ///
    /// 写入一个分段。失败只记录日志并丢弃；丢失的数据由重传恢复。
    pub fn write<S: WireSegment>(&self, segment: &S) {
        let mut buffer = lock(&self.buffer);
        buffer.clear();
        segment.encode(&mut *buffer);
        if let Err(e) = self.writer.write(&buffer) {
            debug!(error = %e, "failed to write segment");
        }
    }

    pub fn close(&self) {
        self.writer.close();
    }
}
