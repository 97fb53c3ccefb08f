//! The reliability layer.
//!
//! This layer is responsible for sequencing, acknowledgments, retransmissions
//! (timeout and fast), flow control and reordering. The connection owns one
//! sending worker, one receiving worker and one round-trip estimator.
//!
//! 可靠性层。
//!
//! 该层负责序列化、确认、重传（超时与快速重传）、流量控制和重排序。
//! 每个连接拥有一个发送端、一个接收端和一个往返时间估算器。

pub mod ack_list;
pub mod recv_buffer;
pub mod rtt;
pub mod send_buffer;

pub use self::{
    recv_buffer::ReceivingWorker, rtt::RoundTripInfo, send_buffer::SendingWorker,
};
