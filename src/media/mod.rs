//! Media primitives shared by the relay
//!
//! This module provides:
//! - RTP/RTCP header inspection and NACK decoding
//! - Packet types and the sink/source capability traits
//! - The one-to-many fan-out processor
//! - Per-kind packet history for retransmission

pub mod fanout;
pub mod packet;
pub mod packet_buffer;
pub mod rtp;
pub mod sink;

pub use fanout::{subscriber_id, FanOutProcessor};
pub use packet::{DataPacket, PacketKind};
pub use packet_buffer::{PacketBuffer, DEFAULT_PACKET_BUFFER_SIZE};
pub use rtp::{NackItem, RtcpHeader, RtcpPacketType, RtpHeader};
pub use sink::{FeedbackSink, MediaSink, MediaSource};
