//! Media sink and source capabilities
//!
//! Anything that can accept relayed media implements [`MediaSink`]; anything
//! that accepts RTCP feedback flowing back toward a sender implements
//! [`FeedbackSink`]; anything that produces media implements [`MediaSource`].
//!
//! Ownership runs downstream: a source holds its sink strongly, while a sink
//! only keeps a weak route back to the feedback target so that tearing down
//! either side never leaves a dangling reference.

use std::sync::{Arc, Weak};

use super::packet::DataPacket;
use crate::error::Result;

/// Receiver of relayed audio/video packets
///
/// Implementations must not block: delivery happens on the hot media path.
pub trait MediaSink: Send + Sync {
    fn deliver_audio(&self, packet: DataPacket) -> Result<()>;

    fn deliver_video(&self, packet: DataPacket) -> Result<()>;

    /// Route for feedback this sink produces (NACK, PLI, receiver reports)
    fn set_feedback_sink(&self, _sink: Option<Weak<dyn FeedbackSink>>) {}

    /// Stop accepting media; must be idempotent
    fn close(&self) {}
}

/// Receiver of RTCP feedback travelling upstream
pub trait FeedbackSink: Send + Sync {
    fn deliver_feedback(&self, packet: DataPacket) -> Result<()>;
}

/// Producer of audio/video packets
pub trait MediaSource: Send + Sync {
    /// Where produced media is pushed; `None` detaches
    fn set_media_sink(&self, sink: Option<Arc<dyn MediaSink>>);

    /// Where downstream feedback for this source should go
    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>>;
}

/// Deliver a packet to the sink method matching its kind
pub fn deliver(sink: &dyn MediaSink, packet: DataPacket) -> Result<()> {
    match packet.kind {
        super::PacketKind::Audio => sink.deliver_audio(packet),
        _ => sink.deliver_video(packet),
    }
}
