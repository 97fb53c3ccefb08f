//! The packet module, containing the wire segments and their codec.
//! packet 模块，包含线上分段及其编解码。

pub mod command;
pub mod segment;

pub use command::{Command, SegmentOption};
pub use segment::{AckSegment, CmdOnlySegment, DataSegment, Segment, WireSegment};
