//! Manages the receiving of data: reordering incoming segments into an
//! in-order byte stream and producing acknowledgments for them.
//!
//! 管理数据的接收：将到达的分段重排为有序字节流，并为其生成确认。

use super::ack_list::AckList;
use crate::packet::{AckSegment, DataSegment, SegmentOption};
use bytes::{Buf, Bytes};
use tracing::trace;

/// A fixed-capacity slot array addressed by `(number - next_number)`.
///
/// 固定容量的槽数组，按 `(number - next_number)` 寻址。
#[derive(Debug)]
pub struct ReceivingWindow {
    cache: Vec<Option<DataSegment>>,
    start: usize,
}

impl ReceivingWindow {
    pub fn new(size: usize) -> Self {
        Self {
            cache: std::iter::repeat_with(|| None).take(size.max(1)).collect(),
            start: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.cache.len()
    }

    fn position(&self, idx: usize) -> usize {
        (idx + self.start) % self.cache.len()
    }

    /// Stores a segment `idx` slots after the window start. Returns `false`
    /// when the slot is already taken.
    ///
    /// 将分段存放在窗口起点之后第 `idx` 个槽。如果该槽已被占用则返回 `false`。
    pub fn set(&mut self, idx: usize, segment: DataSegment) -> bool {
        let pos = self.position(idx);
        if self.cache[pos].is_some() {
            return false;
        }
        self.cache[pos] = Some(segment);
        true
    }

    pub fn has_first(&self) -> bool {
        self.cache[self.start].is_some()
    }

    /// Takes the segment at the window start and slides the window by one.
    /// A gap at the start yields `None` and leaves the window where it is.
    ///
    /// 取出窗口起点的分段并将窗口滑动一格。起点处为空时返回 `None` 且窗口不动。
    pub fn remove_first(&mut self) -> Option<DataSegment> {
        let segment = self.cache[self.start].take()?;
        self.start = (self.start + 1) % self.cache.len();
        Some(segment)
    }

    pub fn clear(&mut self) {
        self.cache.iter_mut().for_each(|slot| *slot = None);
    }
}

/// The receive half of a connection.
///
/// 连接的接收端。
#[derive(Debug)]
pub struct ReceivingWorker {
    conversation: u16,
    window: ReceivingWindow,
    ack_list: AckList,
    /// The next number to deliver to the application.
    next_number: u32,
    window_size: u32,
    /// Delivered bytes not yet consumed by a `read`.
    left_over: Vec<Bytes>,
}

impl ReceivingWorker {
    pub fn new(conversation: u16, window_size: u32) -> Self {
        let window_size = window_size.max(1);
        Self {
            conversation,
            window: ReceivingWindow::new(window_size as usize),
            ack_list: AckList::new(),
            next_number: 0,
            window_size,
            left_over: Vec::new(),
        }
    }

    /// Accepts a data segment. Segments outside the window are dropped; in-window
    /// segments are always acknowledged, duplicates included.
    ///
    /// 接收一个数据分段。窗口外的分段被丢弃；窗口内的分段总会被确认，包括重复的分段。
    pub fn process_segment(&mut self, segment: DataSegment) {
        let number = segment.number;
        let idx = number.wrapping_sub(self.next_number);
        if idx >= self.window_size {
            trace!(
                conv = self.conversation,
                number,
                next = self.next_number,
                "dropping data segment outside the receiving window"
            );
            return;
        }
        self.ack_list.clear(segment.sending_next);
        self.ack_list.add(number, segment.timestamp);
        if !self.window.set(idx as usize, segment) {
            trace!(conv = self.conversation, number, "duplicate data segment");
        }
    }

    /// Drains every contiguous segment from the window start.
    ///
    /// 从窗口起点取出所有连续的分段。
    pub fn read_multi_buffer(&mut self) -> Vec<Bytes> {
        if !self.left_over.is_empty() {
            return std::mem::take(&mut self.left_over);
        }
        let first = self.next_number;
        let mut chunks = Vec::new();
        while let Some(segment) = self.window.remove_first() {
            self.next_number = self.next_number.wrapping_add(1);
            if !segment.payload.is_empty() {
                chunks.push(segment.payload);
            }
        }
        if self.next_number != first {
            // The window opened up; the peer hears about it on the next flush.
            self.ack_list.mark_dirty();
        }
        chunks
    }

    /// Copies delivered bytes into `buf`, keeping whatever does not fit for the
    /// next call. Returns the number of bytes copied.
    ///
    /// 将已交付的字节复制到 `buf` 中，放不下的部分留给下一次调用。返回复制的字节数。
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut chunks = self.read_multi_buffer();
        let mut copied = 0;
        let mut rest = Vec::new();
        for mut chunk in chunks.drain(..) {
            if copied == buf.len() {
                rest.push(chunk);
                continue;
            }
            let n = chunk.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
            chunk.advance(n);
            if !chunk.is_empty() {
                rest.push(chunk);
            }
        }
        self.left_over = rest;
        copied
    }

    /// True when a `read` would return data.
    pub fn is_data_available(&self) -> bool {
        !self.left_over.is_empty() || self.window.has_first()
    }

    pub fn next_number(&self) -> u32 {
        self.next_number
    }

    /// Prunes acknowledgments the peer no longer needs.
    pub fn process_sending_next(&mut self, number: u32) {
        self.ack_list.clear(number);
    }

    /// Forces an ack on the next flush, advertising the current window.
    pub fn mark_dirty(&mut self) {
        self.ack_list.mark_dirty();
    }

    /// Emits pending acknowledgments, stamped with the current receive window.
    ///
    /// 发出待发送的确认，并附上当前的接收窗口。
    pub fn flush<F>(&mut self, current: u32, rto: u32, option: SegmentOption, mut out: F)
    where
        F: FnMut(AckSegment),
    {
        let conversation = self.conversation;
        let receiving_next = self.next_number;
        let receiving_window = self.next_number.wrapping_add(self.window_size);
        self.ack_list.flush(current, rto, |mut seg| {
            seg.conversation = conversation;
            seg.option = option;
            seg.receiving_next = receiving_next;
            seg.receiving_window = receiving_window;
            out(seg);
        });
    }

    pub fn update_necessary(&self) -> bool {
        !self.ack_list.is_empty() || self.ack_list.is_dirty()
    }

    pub fn release(&mut self) {
        self.window.clear();
        self.left_over.clear();
    }
}
