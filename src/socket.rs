//! The socket-level API: datagram sockets, packet framing, the listener and the dialer.
//! 套接字层 API：数据报套接字、数据包封装、监听器和拨号器。
pub mod dialer;
pub mod listener;
pub mod packet_io;
pub mod security;
mod sender;
pub mod traits;

pub use dialer::Dialer;
pub use listener::Listener;
pub use packet_io::{PacketReader, PacketWriter, Security};
pub use security::{AesGcmSealer, PacketHeader, PacketSealer, Srtp};
pub use traits::{AsyncUdpSocket, DatagramSink};
