//! 定义了连接和协议的可配置参数。
//! Defines configurable parameters for connections and the protocol.

use crate::error::{Error, Result};
use std::time::Duration;

const MIB: u32 = 1024 * 1024;

/// A structure containing all configurable parameters for a connection.
///
/// 包含所有连接可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Datagram sizing and throughput parameters.
    /// 数据报大小与吞吐量参数。
    pub transport: TransportConfig,

    /// Reliability-related parameters.
    /// 可靠性相关参数。
    pub reliability: ReliabilityConfig,

    /// Timeouts driving the connection state machine.
    /// 驱动连接状态机的超时参数。
    pub lifecycle: LifecycleConfig,

    /// Parameters of the server-side listener.
    /// 服务端监听器参数。
    pub listener: ListenerConfig,
}

/// Datagram sizing and throughput parameters.
///
/// 数据报大小与吞吐量参数。
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum size of a single datagram, including obfuscation and sealing overhead.
    /// 单个数据报的最大大小，包括混淆和加密开销。
    pub mtu: u32,
    /// Transmission time interval in milliseconds: how often pending data is flushed.
    /// 传输时间间隔（毫秒）：刷新待发送数据的频率。
    pub tti: u32,
    /// Expected upstream bandwidth in MB/s. Sizes the sending in-flight window.
    /// 预期上行带宽（MB/s），决定发送在途窗口的大小。
    pub uplink_capacity: u32,
    /// Expected downstream bandwidth in MB/s. Sizes the receiving window.
    /// 预期下行带宽（MB/s），决定接收窗口的大小。
    pub downlink_capacity: u32,
    /// Write buffer size in MB. Bounds the number of unacknowledged segments.
    /// 写缓冲区大小（MB），限制未确认分段的数量。
    pub write_buffer_size: u32,
}

/// Reliability-related parameters.
///
/// 可靠性相关参数。
#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    /// Number of times a segment may be skipped by acknowledgments before it is
    /// fast-retransmitted. Zero disables fast retransmission.
    /// 分段被确认跳过多少次后触发快速重传。为零时禁用快速重传。
    pub fast_resend: u32,
    /// Enables the loss-rate driven congestion window.
    /// 启用基于丢包率的拥塞窗口。
    pub congestion: bool,
    /// RTO used before the first round-trip sample, in milliseconds.
    /// 首个往返样本之前使用的 RTO（毫秒）。
    pub initial_rto_ms: u32,
}

/// Timeouts driving the connection state machine.
///
/// 驱动连接状态机的超时参数。
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// An active connection with no incoming data for this long closes itself.
    pub idle_timeout: Duration,
    /// Longest time spent in `ReadyToClose` waiting for in-flight data to drain.
    pub ready_to_close_timeout: Duration,
    /// Longest time spent in `PeerTerminating` before terminating locally.
    pub peer_terminating_timeout: Duration,
    /// Longest time spent in `Terminating` before the connection is terminated.
    pub terminating_timeout: Duration,
    /// Interval of the keep-alive updater while the connection is open.
    /// 连接打开期间保活更新器的间隔。
    pub keepalive_interval: Duration,
    /// Interval of the keep-alive updater once the connection is closing.
    /// 连接关闭过程中保活更新器的间隔。
    pub closing_keepalive_interval: Duration,
    /// Minimum spacing between two pings sent by a flush.
    pub ping_interval: Duration,
}

/// Parameters of the server-side listener.
///
/// 服务端监听器参数。
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Capacity of the queue of accepted-but-not-yet-taken connections.
    pub accept_backlog: usize,
    /// How long a new connection may wait for room in the accept queue before it is dropped.
    /// 新连接在被丢弃前等待接受队列空位的最长时间。
    pub accept_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: 1350, // A safe default MTU, leaves room for IP/UDP headers
            tti: 50,
            uplink_capacity: 5,
            downlink_capacity: 20,
            write_buffer_size: 2,
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            fast_resend: 2,
            congestion: false,
            initial_rto_ms: 100,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            ready_to_close_timeout: Duration::from_secs(15),
            peer_terminating_timeout: Duration::from_secs(4),
            terminating_timeout: Duration::from_secs(8),
            keepalive_interval: Duration::from_secs(5),
            closing_keepalive_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(3),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            accept_backlog: 128,
            accept_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Checks that every value lies in its accepted range.
    ///
    /// 检查每个配置值是否在允许范围内。
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        if !(576..=1460).contains(&t.mtu) {
            return Err(invalid("transport.mtu", format!("{} not in 576..=1460", t.mtu)));
        }
        if !(10..=100).contains(&t.tti) {
            return Err(invalid("transport.tti", format!("{} not in 10..=100", t.tti)));
        }
        if t.uplink_capacity == 0 {
            return Err(invalid("transport.uplink_capacity", "must be positive".into()));
        }
        if t.downlink_capacity == 0 {
            return Err(invalid("transport.downlink_capacity", "must be positive".into()));
        }
        if t.write_buffer_size == 0 {
            return Err(invalid("transport.write_buffer_size", "must be positive".into()));
        }
        if self.reliability.initial_rto_ms == 0 {
            return Err(invalid("reliability.initial_rto_ms", "must be positive".into()));
        }
        let l = &self.lifecycle;
        for (field, value) in [
            ("lifecycle.idle_timeout", l.idle_timeout),
            ("lifecycle.ready_to_close_timeout", l.ready_to_close_timeout),
            ("lifecycle.peer_terminating_timeout", l.peer_terminating_timeout),
            ("lifecycle.terminating_timeout", l.terminating_timeout),
            ("lifecycle.keepalive_interval", l.keepalive_interval),
            ("lifecycle.closing_keepalive_interval", l.closing_keepalive_interval),
            ("lifecycle.ping_interval", l.ping_interval),
            ("listener.accept_timeout", self.listener.accept_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be positive".into()));
            }
        }
        if self.listener.accept_backlog == 0 {
            return Err(invalid("listener.accept_backlog", "must be positive".into()));
        }
        Ok(())
    }

    /// The maximum datagram size.
    pub fn mtu(&self) -> u32 {
        self.transport.mtu
    }

    /// The flush interval in milliseconds.
    pub fn tti(&self) -> u32 {
        self.transport.tti
    }

    /// Maximum number of segment transmissions per flush on the sending side.
    ///
    /// 发送端每次刷新的最大分段传输数。
    pub fn sending_in_flight_size(&self) -> u32 {
        let t = &self.transport;
        let size = t.uplink_capacity.saturating_mul(MIB) / t.mtu / (1000 / t.tti);
        size.max(8)
    }

    /// Maximum number of unacknowledged segments the sending window holds.
    ///
    /// 发送窗口可容纳的未确认分段的最大数量。
    pub fn sending_buffer_size(&self) -> u32 {
        let t = &self.transport;
        (t.write_buffer_size.saturating_mul(MIB) / t.mtu).max(1)
    }

    /// Number of slots in the receiving window.
    ///
    /// 接收窗口中的槽位数。
    pub fn receiving_in_flight_size(&self) -> u32 {
        let t = &self.transport;
        let size = t.downlink_capacity.saturating_mul(MIB) / t.mtu / (1000 / t.tti);
        size.max(8)
    }
}

fn invalid(field: &'static str, reason: String) -> Error {
    Error::InvalidConfig { field, reason }
}
