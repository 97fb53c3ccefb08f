//! 定义了可以在网络上传输的三种分段及其编解码。
//! Defines the three segment kinds that travel on the wire, and their codec.
//!
//! Every segment starts with a common header:
//! `conversation (u16) | command (u8) | option (u8)`, followed by a body whose
//! layout depends on the command. All integers are big-endian.

use super::command::{Command, SegmentOption};
use bytes::{Buf, BufMut, Bytes};

/// Size of the header shared by all segments.
pub const COMMON_HEADER_SIZE: usize = 4;
/// Fixed overhead of a data segment, excluding its payload.
/// 数据分段的固定开销（不含载荷）。
pub const DATA_SEGMENT_OVERHEAD: usize = 18;
/// Fixed overhead of an ack segment, excluding its number list.
pub const ACK_SEGMENT_OVERHEAD: usize = 17;
/// Total size of a command-only segment.
/// 纯命令分段的总大小。
pub const CMD_ONLY_SEGMENT_SIZE: usize = 16;
/// Maximum number of sequence numbers a single ack segment carries.
/// 单个确认分段携带的序列号的最大数量。
pub const ACK_NUMBER_LIMIT: usize = 128;

/// A segment carrying application data.
///
/// 携带应用数据的分段。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSegment {
    pub conversation: u16,
    pub option: SegmentOption,
    /// Sender clock, in milliseconds, when this copy was transmitted.
    /// 该副本发送时的发送方时钟（毫秒）。
    pub timestamp: u32,
    /// Sequence number.
    pub number: u32,
    /// The sender's first unacknowledged number when this copy was transmitted.
    /// 该副本发送时发送方的首个未确认序号。
    pub sending_next: u32,
    pub payload: Bytes,
}

/// A segment acknowledging individual data segments.
///
/// 逐个确认数据分段的确认分段。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AckSegment {
    pub conversation: u16,
    pub option: SegmentOption,
    /// One past the highest number the receiver is willing to buffer.
    /// 接收方愿意缓冲的最大序号加一。
    pub receiving_window: u32,
    /// The next number the receiver expects to deliver.
    /// 接收方期望交付的下一个序号。
    pub receiving_next: u32,
    /// Latest transmit timestamp among the acknowledged segments.
    pub timestamp: u32,
    pub numbers: Vec<u32>,
}

/// A segment carrying only a command and the window bases.
///
/// 只携带命令和窗口基准的分段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOnlySegment {
    pub conversation: u16,
    pub command: Command,
    pub option: SegmentOption,
    pub sending_next: u32,
    pub receiving_next: u32,
    /// The retransmission timeout the sender currently uses, in milliseconds.
    /// 发送方当前使用的重传超时（毫秒）。
    pub peer_rto: u32,
}

/// Any segment that can be sent or received.
///
/// 任何可以被发送或接收的分段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Data(DataSegment),
    Ack(AckSegment),
    Cmd(CmdOnlySegment),
}

/// Serialization shared by the three segment kinds.
///
/// 三种分段共享的序列化接口。
pub trait WireSegment {
    /// The number of bytes `encode` writes.
    fn encoded_len(&self) -> usize;

    /// Encodes the segment into a buffer.
    fn encode<B: BufMut>(&self, buf: &mut B);
}

impl DataSegment {
    /// Decodes the body of a data segment; the common header has already been read.
    fn decode_body<B: Buf>(conversation: u16, option: SegmentOption, buf: &mut B) -> Option<Self> {
        if buf.remaining() < DATA_SEGMENT_OVERHEAD - COMMON_HEADER_SIZE {
            return None;
        }
        let timestamp = buf.get_u32();
        let number = buf.get_u32();
        let sending_next = buf.get_u32();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return None;
        }
        Some(DataSegment {
            conversation,
            option,
            timestamp,
            number,
            sending_next,
            payload: buf.copy_to_bytes(len),
        })
    }
}

impl WireSegment for DataSegment {
    fn encoded_len(&self) -> usize {
        DATA_SEGMENT_OVERHEAD + self.payload.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.conversation);
        buf.put_u8(Command::Data as u8);
        buf.put_u8(self.option.bits());
        buf.put_u32(self.timestamp);
        buf.put_u32(self.number);
        buf.put_u32(self.sending_next);
        debug_assert!(self.payload.len() <= u16::MAX as usize);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }
}

impl AckSegment {
    /// Creates an empty ack segment for a conversation.
    pub fn new(conversation: u16) -> Self {
        Self {
            conversation,
            ..Default::default()
        }
    }

    /// Records the transmit timestamp of an acknowledged segment, keeping the latest one.
    ///
    /// 记录被确认分段的发送时间戳，保留最新的一个。
    pub fn put_timestamp(&mut self, timestamp: u32) {
        if timestamp.wrapping_sub(self.timestamp) < 0x7FFF_FFFF {
            self.timestamp = timestamp;
        }
    }

    /// Appends an acknowledged number. Callers check `is_full` first.
    pub fn put_number(&mut self, number: u32) {
        self.numbers.push(number);
    }

    pub fn is_full(&self) -> bool {
        self.numbers.len() >= ACK_NUMBER_LIMIT
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    fn decode_body<B: Buf>(conversation: u16, option: SegmentOption, buf: &mut B) -> Option<Self> {
        if buf.remaining() < ACK_SEGMENT_OVERHEAD - COMMON_HEADER_SIZE {
            return None;
        }
        let receiving_window = buf.get_u32();
        let receiving_next = buf.get_u32();
        let timestamp = buf.get_u32();
        let count = buf.get_u8() as usize;
        if buf.remaining() < count * 4 {
            return None;
        }
        let numbers = (0..count).map(|_| buf.get_u32()).collect();
        Some(AckSegment {
            conversation,
            option,
            receiving_window,
            receiving_next,
            timestamp,
            numbers,
        })
    }
}

impl WireSegment for AckSegment {
    fn encoded_len(&self) -> usize {
        ACK_SEGMENT_OVERHEAD + self.numbers.len().min(ACK_NUMBER_LIMIT) * 4
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.conversation);
        buf.put_u8(Command::Ack as u8);
        buf.put_u8(self.option.bits());
        buf.put_u32(self.receiving_window);
        buf.put_u32(self.receiving_next);
        buf.put_u32(self.timestamp);
        // The count field is a single byte; the list never exceeds ACK_NUMBER_LIMIT.
        let count = self.numbers.len().min(ACK_NUMBER_LIMIT);
        buf.put_u8(count as u8);
        for &number in &self.numbers[..count] {
            buf.put_u32(number);
        }
    }
}

impl CmdOnlySegment {
    fn decode_body<B: Buf>(
        conversation: u16,
        command: Command,
        option: SegmentOption,
        buf: &mut B,
    ) -> Option<Self> {
        if buf.remaining() < CMD_ONLY_SEGMENT_SIZE - COMMON_HEADER_SIZE {
            return None;
        }
        Some(CmdOnlySegment {
            conversation,
            command,
            option,
            sending_next: buf.get_u32(),
            receiving_next: buf.get_u32(),
            peer_rto: buf.get_u32(),
        })
    }
}

impl WireSegment for CmdOnlySegment {
    fn encoded_len(&self) -> usize {
        CMD_ONLY_SEGMENT_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.conversation);
        buf.put_u8(self.command as u8);
        buf.put_u8(self.option.bits());
        buf.put_u32(self.sending_next);
        buf.put_u32(self.receiving_next);
        buf.put_u32(self.peer_rto);
    }
}

impl Segment {
    pub fn conversation(&self) -> u16 {
        match self {
            Segment::Data(seg) => seg.conversation,
            Segment::Ack(seg) => seg.conversation,
            Segment::Cmd(seg) => seg.conversation,
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Segment::Data(_) => Command::Data,
            Segment::Ack(_) => Command::Ack,
            Segment::Cmd(seg) => seg.command,
        }
    }

    pub fn option(&self) -> SegmentOption {
        match self {
            Segment::Data(seg) => seg.option,
            Segment::Ack(seg) => seg.option,
            Segment::Cmd(seg) => seg.option,
        }
    }

    /// 从缓冲区解码一个分段。截断或格式错误时返回 `None`。
    /// Decodes one segment from the front of a buffer, advancing it past the
    /// segment. Returns `None` when the data is truncated or malformed; the
    /// buffer position is unspecified in that case.
    pub fn decode<B: Buf>(buf: &mut B) -> Option<Self> {
        if buf.remaining() < COMMON_HEADER_SIZE {
            return None;
        }
        let conversation = buf.get_u16();
        let command = Command::from_u8(buf.get_u8())?;
        let option = SegmentOption::from_bits_retain(buf.get_u8());
        match command {
            Command::Data => DataSegment::decode_body(conversation, option, buf).map(Segment::Data),
            Command::Ack => AckSegment::decode_body(conversation, option, buf).map(Segment::Ack),
            Command::Terminate | Command::Ping => {
                CmdOnlySegment::decode_body(conversation, command, option, buf).map(Segment::Cmd)
            }
        }
    }

    /// Decodes back-to-back segments until the buffer is exhausted or a
    /// malformed segment is met. Anything after a malformed segment is dropped.
    ///
    /// 连续解码分段，直到缓冲区耗尽或遇到格式错误的分段。格式错误之后的数据被丢弃。
    pub fn decode_all(mut buf: Bytes) -> Vec<Segment> {
        let mut segments = Vec::new();
        while buf.has_remaining() {
            match Segment::decode(&mut buf) {
                Some(segment) => segments.push(segment),
                None => break,
            }
        }
        segments
    }
}

impl WireSegment for Segment {
    fn encoded_len(&self) -> usize {
        match self {
            Segment::Data(seg) => seg.encoded_len(),
            Segment::Ack(seg) => seg.encoded_len(),
            Segment::Cmd(seg) => seg.encoded_len(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Segment::Data(seg) => seg.encode(buf),
            Segment::Ack(seg) => seg.encode(buf),
            Segment::Cmd(seg) => seg.encode(buf),
        }
    }
}
