//! Optional datagram disguise headers and authenticated encryption.
//!
//! 可选的数据报伪装头部与认证加密。

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Key};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU16, Ordering};

/// A fixed-size header prepended to every datagram to disguise the traffic.
///
/// 添加在每个数据报之前、用于伪装流量的固定大小头部。
pub trait PacketHeader: Send + Sync + 'static {
    /// Number of bytes `serialize` writes.
    fn size(&self) -> usize;

    /// Writes the next header into `buf`, which is exactly `size()` bytes long.
    /// 将下一个头部写入 `buf`，其长度恰好为 `size()` 字节。
    fn serialize(&self, buf: &mut [u8]);
}

/// An authenticated-encryption envelope around a datagram's segments.
///
/// 包裹数据报分段的认证加密封装。
pub trait PacketSealer: Send + Sync + 'static {
    /// Length of the nonce carried in front of every sealed payload.
    fn nonce_size(&self) -> usize;

    /// Bytes added to a plaintext by `seal`, excluding the nonce.
    fn overhead(&self) -> usize;

    fn seal(&self, nonce: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Opens a sealed payload. Fails with [`Error::Authentication`] when the
    /// payload was tampered with or sealed under another key.
    ///
    /// 打开封装的载荷。载荷被篡改或使用其他密钥封装时返回 [`Error::Authentication`]。
    fn open(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;
}

/// A 4-byte header that looks like the start of an SRTP packet: a constant
/// marker followed by a running packet number.
///
/// 一个看起来像 SRTP 数据包开头的 4 字节头部：固定标记加上递增的包序号。
#[derive(Debug)]
pub struct Srtp {
    header: u16,
    number: AtomicU16,
}

impl Srtp {
    const MARKER: u16 = 0xB5E8;

    pub fn new() -> Self {
        Self {
            header: Self::MARKER,
            number: AtomicU16::new(rand::random()),
        }
    }
}

impl Default for Srtp {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketHeader for Srtp {
    fn size(&self) -> usize {
        4
    }

    fn serialize(&self, buf: &mut [u8]) {
        let number = self.number.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        buf[..2].copy_from_slice(&self.header.to_be_bytes());
        buf[2..4].copy_from_slice(&number.to_be_bytes());
    }
}

/// AES-128-GCM keyed by the first 16 bytes of `SHA-256(seed)`.
///
/// 使用 `SHA-256(seed)` 前 16 字节作为密钥的 AES-128-GCM。
pub struct AesGcmSealer {
    cipher: Aes128Gcm,
}

impl std::fmt::Debug for AesGcmSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmSealer").finish_non_exhaustive()
    }
}

impl AesGcmSealer {
    const NONCE_SIZE: usize = 12;
    const TAG_SIZE: usize = 16;

    pub fn new(seed: &[u8]) -> Self {
        let digest = Sha256::digest(seed);
        let key = Key::<Aes128Gcm>::clone_from_slice(&digest[..16]);
        Self {
            cipher: Aes128Gcm::new(&key),
        }
    }

    fn nonce(nonce: &[u8]) -> Result<&Nonce<Aes128Gcm>> {
        if nonce.len() != Self::NONCE_SIZE {
            return Err(Error::Authentication);
        }
        Ok(Nonce::<Aes128Gcm>::from_slice(nonce))
    }
}

impl PacketSealer for AesGcmSealer {
    fn nonce_size(&self) -> usize {
        Self::NONCE_SIZE
    }

    fn overhead(&self) -> usize {
        Self::TAG_SIZE
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce = Self::nonce(nonce)?;
        self.cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| Error::Authentication)
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce = Self::nonce(nonce)?;
        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| Error::Authentication)
    }
}
