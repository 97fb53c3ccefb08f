//! 定义协议的所有命令与分段选项。
//! Defines all commands and segment options of the protocol.

use bitflags::bitflags;
use std::fmt;

/// The kind of a segment. The third byte of every segment on the wire.
/// 分段类型，每个分段在线上的第三个字节。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Acknowledgment of received data segments.
    /// 对已接收数据分段的确认。
    Ack = 0,
    /// Data segment.
    /// 数据分段。
    Data = 1,
    /// The sender is tearing the connection down.
    /// 发送方正在拆除连接。
    Terminate = 2,
    /// Keep-alive carrying the sender's window bases and RTO.
    /// 携带发送方窗口基准和 RTO 的保活包。
    Ping = 3,
}

impl Command {
    /// 从一个字节尝试转换成 `Command`。
    /// Tries to convert a byte into a `Command`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Command::Ack),
            1 => Some(Command::Data),
            2 => Some(Command::Terminate),
            3 => Some(Command::Ping),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Ack => "ACK",
            Command::Data => "DATA",
            Command::Terminate => "TERMINATE",
            Command::Ping => "PING",
        };
        write!(f, "{}", s)
    }
}

bitflags! {
    /// Option flags carried by every segment.
    /// 每个分段携带的选项标志。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct SegmentOption: u8 {
        /// The sender has closed its side of the connection.
        /// 发送方已关闭其一侧的连接。
        const CLOSE = 0x01;
    }
}
