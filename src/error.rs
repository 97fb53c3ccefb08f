//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the KCP transport library.
/// KCP 传输库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value is out of its accepted range.
    /// 配置值超出了允许的范围。
    #[error("invalid config `{field}`: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// The connection is closing or closed and no longer accepts this operation.
    /// 连接正在关闭或已关闭，不再接受此操作。
    #[error("Connection closed")]
    ConnectionClosed,

    /// A read or write deadline elapsed before the operation could complete.
    /// 读或写的截止时间在操作完成前已过。
    #[error("I/O timeout")]
    Timeout,

    /// The listener has been closed.
    /// 监听器已关闭。
    #[error("Listener closed")]
    ListenerClosed,

    /// An internal channel for communication between tasks was closed unexpectedly.
    /// 用于任务间通信的内部通道意外关闭。
    #[error("Internal channel is broken")]
    ChannelClosed,

    /// An authenticated-encryption envelope failed to open or seal.
    /// 认证加密封装打开或封装失败。
    #[error("authentication failed")]
    Authentication,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::InvalidConfig { .. } => {
                std::io::Error::new(ErrorKind::InvalidInput, err.to_string())
            }
            Error::ConnectionClosed => ErrorKind::BrokenPipe.into(),
            Error::Timeout => ErrorKind::TimedOut.into(),
            Error::ListenerClosed => ErrorKind::NotConnected.into(),
            Error::ChannelClosed => ErrorKind::BrokenPipe.into(),
            Error::Authentication => ErrorKind::InvalidData.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let timeout: std::io::Error = Error::Timeout.into();
        assert_eq!(timeout.kind(), std::io::ErrorKind::TimedOut);

        let closed: std::io::Error = Error::ConnectionClosed.into();
        assert_eq!(closed.kind(), std::io::ErrorKind::BrokenPipe);

        let config: std::io::Error = Error::InvalidConfig {
            field: "mtu",
            reason: "too small".into(),
        }
        .into();
        assert_eq!(config.kind(), std::io::ErrorKind::InvalidInput);
        assert!(config.to_string().contains("mtu"));
    }
}
