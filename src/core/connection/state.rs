//! Defines the connection state machine.
//!
//! 定义连接状态机。

use std::fmt;

/// The state of a connection.
/// 连接的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Data flows in both directions.
    /// 数据双向流动。
    Active,

    /// The local side closed; in-flight data drains before terminating.
    /// No new reads are served.
    /// 本端已关闭；在途数据排空后进入终止流程。不再提供新的读取。
    ReadyToClose,

    /// The peer closed its side. No new writes are accepted.
    /// 对端已关闭。不再接受新的写入。
    PeerClosed,

    /// Both sides are done; terminate commands are exchanged until the peer
    /// confirms or the timeout elapses.
    /// 双方均已完成；持续交换终止命令，直到对端确认或超时。
    Terminating,

    /// The peer is tearing down but the final handshake has not been observed yet.
    /// 对端正在拆除连接，但尚未观察到最终握手。
    PeerTerminating,

    /// Terminal state: resources are released.
    /// 终止状态：资源已释放。
    Terminated,
}

impl State {
    /// True for `Terminating` and `Terminated`.
    pub fn is_terminating(self) -> bool {
        matches!(self, State::Terminating | State::Terminated)
    }

    /// Whether a `read` may still return data in this state.
    ///
    /// 在此状态下 `read` 是否仍可能返回数据。
    pub fn accepts_reads(self) -> bool {
        !matches!(
            self,
            State::ReadyToClose | State::Terminating | State::Terminated
        )
    }

    /// Whether a `write` is accepted in this state.
    pub fn accepts_writes(self) -> bool {
        self == State::Active
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Active => "active",
            State::ReadyToClose => "ready-to-close",
            State::PeerClosed => "peer-closed",
            State::Terminating => "terminating",
            State::PeerTerminating => "peer-terminating",
            State::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
