//! Pending acknowledgments and their pacing.
//! 待发送的确认及其节奏控制。

use crate::packet::AckSegment;
use crate::packet::segment::ACK_NUMBER_LIMIT;

/// Minimum spacing between two acks of the same number, in milliseconds.
const MIN_ACK_INTERVAL_MS: u32 = 20;

/// Sequence numbers waiting to be acknowledged to the peer.
///
/// A number stays in the list until the peer's unacknowledged base passes it,
/// and is re-acknowledged every `max(rto / 2, 20)` ms meanwhile.
///
/// 等待向对端确认的序列号。序号会一直保留在列表中，直到对端的未确认基准越过它，
/// 在此期间每 `max(rto / 2, 20)` 毫秒重新确认一次。
#[derive(Debug, Default)]
pub struct AckList {
    numbers: Vec<u32>,
    timestamps: Vec<u32>,
    next_flush: Vec<u32>,
    flush_candidates: Vec<u32>,
    /// Set when the peer should hear from us even without due numbers.
    dirty: bool,
}

impl AckList {
    pub fn new() -> Self {
        Self {
            flush_candidates: Vec::with_capacity(ACK_NUMBER_LIMIT),
            ..Default::default()
        }
    }

    /// Queues an acknowledgment for `number`, sent at `timestamp` by the peer.
    pub fn add(&mut self, number: u32, timestamp: u32) {
        self.numbers.push(number);
        self.timestamps.push(timestamp);
        self.next_flush.push(0);
        self.dirty = true;
    }

    /// Forgets every number below `una`, in wrapping order.
    ///
    /// 忘记所有小于 `una` 的序号（按回绕顺序）。
    pub fn clear(&mut self, una: u32) {
        let before = self.numbers.len();
        let mut kept = 0;
        for i in 0..before {
            // numbers[i] < una
            if self.numbers[i].wrapping_sub(una) > 0x7FFF_FFFF {
                continue;
            }
            if i != kept {
                self.numbers[kept] = self.numbers[i];
                self.timestamps[kept] = self.timestamps[i];
                self.next_flush[kept] = self.next_flush[i];
            }
            kept += 1;
        }
        if kept < before {
            self.numbers.truncate(kept);
            self.timestamps.truncate(kept);
            self.next_flush.truncate(kept);
            self.dirty = true;
        }
    }

    /// Requests an ack on the next flush even if no number is due.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Emits ack segments for every due number, at most 128 numbers per segment.
    /// Numbers not yet due ride along on the last segment when there is room.
    ///
    /// 为每个到期的序号发出确认分段，每个分段最多 128 个序号。
    /// 未到期的序号在有空间时附带在最后一个分段中。
    pub fn flush<F>(&mut self, current: u32, rto: u32, mut out: F)
    where
        F: FnMut(AckSegment),
    {
        self.flush_candidates.clear();
        let mut seg = AckSegment::default();
        let interval = (rto / 2).max(MIN_ACK_INTERVAL_MS);

        for i in 0..self.numbers.len() {
            if self.next_flush[i].wrapping_sub(current).wrapping_sub(1) < 0x7FFF_FFFF {
                // next_flush > current
                if self.flush_candidates.len() < ACK_NUMBER_LIMIT {
                    self.flush_candidates.push(self.numbers[i]);
                }
                continue;
            }
            seg.put_number(self.numbers[i]);
            seg.put_timestamp(self.timestamps[i]);
            self.next_flush[i] = current.wrapping_add(interval);

            if seg.is_full() {
                out(std::mem::take(&mut seg));
                self.dirty = false;
            }
        }

        if self.dirty || !seg.is_empty() {
            for &number in &self.flush_candidates {
                if seg.is_full() {
                    break;
                }
                seg.put_number(number);
            }
            out(seg);
            self.dirty = false;
        }
    }
}
