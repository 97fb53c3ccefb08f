//! Defines the pluggable congestion control interface.
//! 定义了可插拔的拥塞控制接口。

use tracing::trace;

/// Loss rate, in percent, at or above which the window shrinks.
const SHRINK_LOSS_RATE: u32 = 15;
/// Loss rate, in percent, at or below which the window grows.
const GROW_LOSS_RATE: u32 = 5;
/// The control window never drops below this many segments.
const MIN_CONTROL_WINDOW: u32 = 16;

/// A trait for congestion control algorithms.
///
/// 拥塞控制算法的 trait。
pub trait CongestionControl: Send + Sync + 'static {
    /// Called after every flush that transmitted something, with the share of
    /// timeout retransmissions among in-flight segments, in percent.
    ///
    /// 在每次有发送的刷新后调用，参数为超时重传在在途分段中所占的百分比。
    fn on_packet_loss(&mut self, loss_rate: u32);

    /// Gets the current congestion window size in segments.
    ///
    /// 获取当前的拥塞窗口大小（以分段为单位）。
    fn window(&self) -> u32;
}

/// A loss-rate driven controller: heavy loss shrinks the window by a quarter,
/// light loss grows it by a quarter.
///
/// 基于丢包率的控制器：严重丢包时窗口缩小四分之一，轻微丢包时扩大四分之一。
#[derive(Debug, Clone)]
pub struct LossRateControl {
    control_window: u32,
    max_window: u32,
}

impl LossRateControl {
    /// Creates a controller starting at `in_flight_size`, allowed to grow up to twice that.
    pub fn new(in_flight_size: u32) -> Self {
        Self {
            control_window: in_flight_size,
            max_window: (2 * in_flight_size).max(MIN_CONTROL_WINDOW),
        }
    }
}

impl CongestionControl for LossRateControl {
    fn on_packet_loss(&mut self, loss_rate: u32) {
        if loss_rate >= SHRINK_LOSS_RATE {
            self.control_window = 3 * self.control_window / 4;
        } else if loss_rate <= GROW_LOSS_RATE {
            self.control_window += self.control_window / 4;
        }
        self.control_window = self.control_window.clamp(MIN_CONTROL_WINDOW, self.max_window);
        trace!(
            loss_rate,
            cwnd = self.control_window,
            "congestion window adjusted"
        );
    }

    fn window(&self) -> u32 {
        self.control_window
    }
}
