//! Manages the sending of data, including buffering, retransmission on timeout,
//! fast retransmission and flow control.
//!
//! 管理数据的发送，包括缓冲、超时重传、快速重传和流量控制。

use crate::congestion::{CongestionControl, LossRateControl};
use crate::packet::{AckSegment, DataSegment, SegmentOption};
use bytes::Buf;
use std::collections::VecDeque;
use tracing::trace;

/// Initial assumption about the peer's receiving window, before its first ack.
const INITIAL_REMOTE_WINDOW: u32 = 32;
/// Round-trip samples longer than this, in milliseconds, are discarded.
const MAX_RTT_SAMPLE_MS: u32 = 10_000;

/// A data segment that has been queued but not yet acknowledged.
#[derive(Debug)]
struct InFlightSegment {
    segment: DataSegment,
    /// Number of times the segment has been transmitted.
    transmit: u32,
    /// Connection clock after which the segment is considered lost.
    timeout: u32,
    /// Number of acks that acknowledged a later segment but not this one.
    ack_skipped: u32,
}

/// Result of a single window flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Segments written during this flush.
    pub sent: u32,
    /// Segments retransmitted because their timeout elapsed.
    pub lost: u32,
}

/// Parameters of a single window flush.
#[derive(Debug, Clone, Copy)]
pub struct FlushParams {
    /// Connection clock, stamped onto every transmitted segment.
    pub current: u32,
    /// The sender's unacknowledged base, stamped onto every transmitted segment.
    pub sending_next: u32,
    pub option: SegmentOption,
    /// Fast-retransmit threshold; zero disables fast retransmission.
    pub resend: u32,
    pub rto: u32,
    /// Maximum transmissions during this flush.
    pub max_transmissions: u32,
    /// Segments numbered at or beyond this are not sent for the first time.
    pub number_limit: u32,
}

/// An ordered ring of unacknowledged data segments.
///
/// 未确认数据分段的有序环形队列。
#[derive(Debug, Default)]
pub struct SendingWindow {
    cache: VecDeque<InFlightSegment>,
    /// Segments transmitted at least once and not yet acknowledged.
    total_in_flight: u32,
}

impl SendingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Appends a segment that has never been sent.
    pub fn push(&mut self, segment: DataSegment) {
        self.cache.push_back(InFlightSegment {
            segment,
            transmit: 0,
            timeout: 0,
            ack_skipped: 0,
        });
    }

    /// The lowest number still in the window.
    pub fn first_number(&self) -> Option<u32> {
        self.cache.front().map(|e| e.segment.number)
    }

    /// Drops every segment numbered below `una`, in wrapping order.
    ///
    /// 丢弃所有序号小于 `una` 的分段（按回绕顺序）。
    pub fn clear(&mut self, una: u32) {
        while let Some(front) = self.cache.front() {
            // front.number >= una
            if front.segment.number.wrapping_sub(una) < 0x7FFF_FFFF {
                break;
            }
            if front.transmit > 0 {
                self.total_in_flight = self.total_in_flight.saturating_sub(1);
            }
            self.cache.pop_front();
        }
    }

    /// Removes the segment with the given number. Returns `true` if it was present.
    pub fn remove(&mut self, number: u32) -> bool {
        let Some(index) = self
            .cache
            .iter()
            .position(|e| e.segment.number.wrapping_sub(number) < 0x7FFF_FFFF)
        else {
            return false;
        };
        if self.cache[index].segment.number != number {
            return false;
        }
        if let Some(entry) = self.cache.remove(index) {
            if entry.transmit > 0 {
                self.total_in_flight = self.total_in_flight.saturating_sub(1);
            }
        }
        true
    }

    /// Counts an ack of `number` as skipping every earlier segment.
    ///
    /// 将对 `number` 的确认计为跳过了所有更早的分段。
    pub fn handle_fast_ack(&mut self, number: u32) {
        for entry in self.cache.iter_mut() {
            if number == entry.segment.number || number.wrapping_sub(entry.segment.number) > 0x7FFF_FFFF {
                break;
            }
            entry.ack_skipped += 1;
        }
    }

    /// Transmits every segment that was never sent, whose timeout elapsed, or that
    /// has been skipped `resend` times, stopping after `max_transmissions`.
    ///
    /// 发送所有从未发送、已超时或被跳过 `resend` 次的分段，在 `max_transmissions` 次发送后停止。
    pub fn flush<F>(&mut self, params: FlushParams, mut out: F) -> FlushStats
    where
        F: FnMut(&DataSegment),
    {
        let mut stats = FlushStats::default();
        if params.max_transmissions == 0 {
            return stats;
        }
        let current = params.current;

        for entry in self.cache.iter_mut() {
            let need_send = if entry.transmit == 0 {
                // Unsent segments form the tail of the window.
                if entry.segment.number.wrapping_sub(params.number_limit) < 0x7FFF_FFFF {
                    break;
                }
                self.total_in_flight += 1;
                true
            } else if current.wrapping_sub(entry.timeout) < 0x7FFF_FFFF {
                stats.lost += 1;
                true
            } else {
                params.resend > 0 && entry.ack_skipped >= params.resend
            };

            if !need_send {
                continue;
            }
            entry.transmit += 1;
            entry.ack_skipped = 0;
            entry.timeout = current.wrapping_add(params.rto);
            entry.segment.timestamp = current;
            entry.segment.sending_next = params.sending_next;
            entry.segment.option = params.option;
            out(&entry.segment);

            stats.sent += 1;
            if stats.sent >= params.max_transmissions {
                break;
            }
        }
        stats
    }

    /// Drops every segment.
    pub fn release(&mut self) {
        self.cache.clear();
        self.total_in_flight = 0;
    }

    fn total_in_flight(&self) -> u32 {
        self.total_in_flight
    }
}

/// The send half of a connection: turns application bytes into numbered data
/// segments and keeps them until acknowledged.
///
/// 连接的发送端：将应用字节转换为带序号的数据分段，并保留到被确认为止。
pub struct SendingWorker {
    conversation: u16,
    window: SendingWindow,
    first_unacknowledged: u32,
    first_unacknowledged_updated: bool,
    next_number: u32,
    /// One past the highest number the peer has room for.
    remote_next_number: u32,
    /// Maximum payload bytes per segment.
    mss: usize,
    /// Transmissions allowed per flush.
    in_flight_size: u32,
    /// Segments the window may hold before `push` refuses data.
    window_size: u32,
    fast_resend: u32,
    congestion: Option<Box<dyn CongestionControl>>,
    closed: bool,
}

impl std::fmt::Debug for SendingWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendingWorker")
            .field("conversation", &self.conversation)
            .field("window_len", &self.window.len())
            .field("first_unacknowledged", &self.first_unacknowledged)
            .field("next_number", &self.next_number)
            .field("remote_next_number", &self.remote_next_number)
            .field("closed", &self.closed)
            .finish()
    }
}

impl SendingWorker {
    /// Creates a worker. `congestion` enables the loss-rate control window.
    pub fn new(
        conversation: u16,
        mss: usize,
        in_flight_size: u32,
        window_size: u32,
        fast_resend: u32,
        congestion: bool,
    ) -> Self {
        let congestion: Option<Box<dyn CongestionControl>> = if congestion {
            Some(Box::new(LossRateControl::new(in_flight_size)))
        } else {
            None
        };
        Self {
            conversation,
            window: SendingWindow::new(),
            first_unacknowledged: 0,
            first_unacknowledged_updated: false,
            next_number: 0,
            remote_next_number: INITIAL_REMOTE_WINDOW,
            mss: mss.max(1),
            in_flight_size,
            window_size,
            fast_resend,
            congestion,
            closed: false,
        }
    }

    /// Replaces the congestion controller.
    pub fn set_congestion_control(&mut self, congestion: Box<dyn CongestionControl>) {
        self.congestion = Some(congestion);
    }

    /// Slices `data` into segments of at most `mss` bytes and queues them.
    /// Returns `false` as soon as the window is full (or the worker closed);
    /// whatever was not queued stays in `data`.
    ///
    /// 将 `data` 切分为不超过 `mss` 字节的分段并排队。窗口满（或已关闭）时立即返回 `false`，
    /// 未排队的数据保留在 `data` 中。
    pub fn push<B: Buf>(&mut self, data: &mut B) -> bool {
        while data.has_remaining() {
            if self.closed || self.window.len() >= self.window_size as usize {
                return false;
            }
            let len = data.remaining().min(self.mss);
            self.window.push(DataSegment {
                conversation: self.conversation,
                number: self.next_number,
                payload: data.copy_to_bytes(len),
                ..Default::default()
            });
            self.next_number = self.next_number.wrapping_add(1);
        }
        !self.closed
    }

    /// Processes an ack segment. Returns a round-trip sample when the highest
    /// acknowledged number was still outstanding.
    ///
    /// 处理确认分段。当被确认的最大序号仍未确认时，返回一个往返时间样本。
    pub fn process_segment(&mut self, current: u32, seg: &AckSegment) -> Option<u32> {
        if self.closed {
            return None;
        }
        // receiving_window > remote_next_number
        let advance = seg.receiving_window.wrapping_sub(self.remote_next_number);
        if advance != 0 && advance < 0x7FFF_FFFF {
            self.remote_next_number = seg.receiving_window;
        }
        self.process_receiving_next(seg.receiving_next);

        let mut max_ack: Option<(u32, bool)> = None;
        for &number in &seg.numbers {
            let removed = self.process_ack(number);
            if max_ack.is_none_or(|(max, _)| {
                number != max && number.wrapping_sub(max) < 0x7FFF_FFFF
            }) {
                max_ack = Some((number, removed));
            }
        }

        let (max_ack, removed) = max_ack?;
        if !removed {
            return None;
        }
        self.window.handle_fast_ack(max_ack);
        let rtt = current.wrapping_sub(seg.timestamp);
        (rtt < MAX_RTT_SAMPLE_MS).then_some(rtt)
    }

    /// Drops everything the peer reports as delivered.
    ///
    /// 丢弃对端报告已交付的所有数据。
    pub fn process_receiving_next(&mut self, next_number: u32) {
        self.window.clear(next_number);
        self.find_first_unacknowledged();
    }

    fn process_ack(&mut self, number: u32) -> bool {
        // number < first_unacknowledged || number >= next_number
        if number.wrapping_sub(self.first_unacknowledged) > 0x7FFF_FFFF
            || number.wrapping_sub(self.next_number) < 0x7FFF_FFFF
        {
            return false;
        }
        let removed = self.window.remove(number);
        if removed {
            self.find_first_unacknowledged();
        }
        removed
    }

    fn find_first_unacknowledged(&mut self) {
        let first = self.first_unacknowledged;
        self.first_unacknowledged = self.window.first_number().unwrap_or(self.next_number);
        if first != self.first_unacknowledged {
            self.first_unacknowledged_updated = true;
        }
    }

    /// Transmits due segments through `out`. Returns `true` when the
    /// unacknowledged base moved since the previous flush, so the caller can
    /// announce it with a ping.
    ///
    /// 通过 `out` 发送到期的分段。当未确认基准自上次刷新以来发生变化时返回 `true`，
    /// 以便调用者通过 ping 通告。
    pub fn flush<F>(&mut self, current: u32, rto: u32, option: SegmentOption, out: F) -> bool
    where
        F: FnMut(&DataSegment),
    {
        if self.closed {
            return false;
        }

        let remote_room = self
            .remote_next_number
            .wrapping_sub(self.first_unacknowledged);
        // A peer window ending behind our base leaves no room.
        let remote_room = if remote_room > 0x7FFF_FFFF { 0 } else { remote_room };
        let mut cwnd = self.in_flight_size.min(remote_room);
        if let Some(cc) = &self.congestion {
            cwnd = cwnd.min(cc.window());
        }

        if !self.window.is_empty() {
            let params = FlushParams {
                current,
                sending_next: self.first_unacknowledged,
                option,
                resend: self.fast_resend,
                rto,
                max_transmissions: cwnd,
                number_limit: self.first_unacknowledged.wrapping_add(cwnd),
            };
            let stats = self.window.flush(params, out);
            if stats.sent > 0 {
                trace!(
                    conv = self.conversation,
                    sent = stats.sent,
                    lost = stats.lost,
                    cwnd,
                    "sending window flushed"
                );
            }
            let total = self.window.total_in_flight();
            if let Some(cc) = self.congestion.as_mut() {
                if rto != 0 && stats.sent > 0 && total != 0 {
                    cc.on_packet_loss(stats.lost * 100 / total);
                }
            }
        }

        std::mem::take(&mut self.first_unacknowledged_updated)
    }

    /// Stops sending: every queued segment is dropped.
    ///
    /// 停止发送：丢弃所有排队的分段。
    pub fn close_write(&mut self) {
        self.window.release();
        self.find_first_unacknowledged();
    }

    /// Releases all resources; further pushes are refused.
    pub fn release(&mut self) {
        self.closed = true;
        self.window.release();
    }

    /// True when no unacknowledged data remains.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True while segments wait for acknowledgment, or the moved base has not
    /// been announced by a flush yet.
    pub fn update_necessary(&self) -> bool {
        !self.window.is_empty() || self.first_unacknowledged_updated
    }

    pub fn first_unacknowledged(&self) -> u32 {
        self.first_unacknowledged
    }

    pub fn next_number(&self) -> u32 {
        self.next_number
    }

    /// Number of queued segments.
    pub fn len(&self) -> usize {
        self.window.len()
    }
}
