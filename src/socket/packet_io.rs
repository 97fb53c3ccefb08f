//! Wraps segments into datagrams and back, applying the optional disguise
//! header and authenticated encryption.
//!
//! Datagram layout: `header | nonce | seal(segments)`, each part present only
//! when the matching collaborator is configured.
//!
//! 将分段封装为数据报并反向解封，应用可选的伪装头部和认证加密。
//!
//! 数据报布局：`header | nonce | seal(segments)`，各部分仅在配置了相应组件时存在。

use super::security::{PacketHeader, PacketSealer};
use super::traits::DatagramSink;
use crate::error::Result;
use crate::packet::Segment;
use bytes::{Bytes, BytesMut};
use rand::Rng;
use std::sync::Arc;
use tracing::trace;

/// The optional collaborators shared by every reader and writer of a socket.
///
/// 一个套接字的所有读写器共享的可选组件。
#[derive(Clone, Default)]
pub struct Security {
    pub header: Option<Arc<dyn PacketHeader>>,
    pub sealer: Option<Arc<dyn PacketSealer>>,
}

impl std::fmt::Debug for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Security")
            .field("header", &self.header.as_ref().map(|h| h.size()))
            .field("sealed", &self.sealer.is_some())
            .finish()
    }
}

impl Security {
    /// No header, no encryption.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, header: impl PacketHeader) -> Self {
        self.header = Some(Arc::new(header));
        self
    }

    pub fn with_sealer(mut self, sealer: impl PacketSealer) -> Self {
        self.sealer = Some(Arc::new(sealer));
        self
    }

    /// Bytes added to every datagram: header, nonce and seal overhead.
    ///
    /// 每个数据报附加的字节数：头部、随机数和加密开销。
    pub fn overhead(&self) -> usize {
        let header = self.header.as_ref().map_or(0, |h| h.size());
        let sealer = self
            .sealer
            .as_ref()
            .map_or(0, |s| s.nonce_size() + s.overhead());
        header + sealer
    }

    pub fn reader(&self) -> PacketReader {
        PacketReader {
            security: self.clone(),
        }
    }

    pub fn writer(&self, sink: Arc<dyn DatagramSink>) -> PacketWriter {
        PacketWriter {
            security: self.clone(),
            sink,
        }
    }
}

/// Turns received datagrams into segments.
///
/// 将收到的数据报转换为分段。
#[derive(Debug, Clone)]
pub struct PacketReader {
    security: Security,
}

impl PacketReader {
    /// Unwraps a datagram. Anything that fails to authenticate or is too short
    /// yields no segments.
    ///
    /// 解封一个数据报。认证失败或过短的数据报不产生任何分段。
    pub fn read(&self, datagram: Bytes) -> Vec<Segment> {
        let header_size = self.security.header.as_ref().map_or(0, |h| h.size());
        if datagram.len() <= header_size {
            return Vec::new();
        }
        let mut body = datagram.slice(header_size..);

        if let Some(sealer) = &self.security.sealer {
            let nonce_size = sealer.nonce_size();
            if body.len() < nonce_size + sealer.overhead() {
                trace!(len = datagram.len(), "datagram too short to be sealed");
                return Vec::new();
            }
            let (nonce, ciphertext) = body.split_at(nonce_size);
            match sealer.open(nonce, ciphertext, &[]) {
                Ok(plaintext) => body = Bytes::from(plaintext),
                Err(e) => {
                    trace!(error = %e, "dropping datagram that failed to open");
                    return Vec::new();
                }
            }
        }

        Segment::decode_all(body)
    }
}

/// Wraps serialized segments into datagrams for one peer.
///
/// 将序列化的分段封装为发往某个对端的数据报。
#[derive(Clone)]
pub struct PacketWriter {
    security: Security,
    sink: Arc<dyn DatagramSink>,
}

impl std::fmt::Debug for PacketWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketWriter")
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl PacketWriter {
    pub fn overhead(&self) -> usize {
        self.security.overhead()
    }

    /// Sends `payload` as one datagram. Returns the payload length.
    ///
    /// 将 `payload` 作为一个数据报发送。返回载荷长度。
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        let mut datagram = BytesMut::with_capacity(self.overhead() + payload.len());

        if let Some(header) = &self.security.header {
            datagram.resize(header.size(), 0);
            header.serialize(&mut datagram[..]);
        }

        match &self.security.sealer {
            Some(sealer) => {
                let mut nonce = vec![0u8; sealer.nonce_size()];
                rand::rng().fill(&mut nonce[..]);
                let sealed = sealer.seal(&nonce, payload, &[])?;
                datagram.extend_from_slice(&nonce);
                datagram.extend_from_slice(&sealed);
            }
            None => datagram.extend_from_slice(payload),
        }

        self.sink.send_datagram(datagram.freeze())?;
        Ok(payload.len())
    }

    /// Tells the sink its connection is gone.
    pub fn close(&self) {
        self.sink.close();
    }
}
