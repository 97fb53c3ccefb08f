#![deny(clippy::expect_used, clippy::unwrap_used)]

//! A reliable, ordered, congestion-aware stream transport (mKCP style) built on
//! top of an unreliable datagram socket.
//! 构建在不可靠数据报套接字之上的可靠、有序、具备拥塞感知的流传输协议（mKCP 风格）。

pub mod config;
pub mod error;
pub mod packet;
pub mod socket;

pub mod congestion;
pub mod core;

pub use crate::config::Config;
pub use crate::core::connection::{ConnMetadata, Connection, State};
pub use crate::error::{Error, Result};
pub use crate::socket::{Dialer, Listener};
