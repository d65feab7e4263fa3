//! Fixed per-stream processing pipeline
//!
//! ```text
//!   read:  datagram ─► retransmission ─► (replays ─► wire) / forward ─► demux
//!   write: packet ─► packet buffer (RTP only) ─► wire
//! ```
//!
//! The stages are fixed when the stream is built and never rearranged.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::retransmission::RetransmissionHandler;
use crate::media::{DataPacket, PacketBuffer, PacketKind};

/// Audio and video SSRCs known for one bridge stream
///
/// Zero means "not known yet".
#[derive(Debug, Default)]
pub struct SsrcTable {
    audio: AtomicU32,
    video: AtomicU32,
}

impl SsrcTable {
    pub fn new(audio: u32, video: u32) -> Self {
        Self {
            audio: AtomicU32::new(audio),
            video: AtomicU32::new(video),
        }
    }

    pub fn audio(&self) -> u32 {
        self.audio.load(Ordering::Relaxed)
    }

    pub fn video(&self) -> u32 {
        self.video.load(Ordering::Relaxed)
    }

    /// Media kind whose SSRC equals `ssrc`
    pub fn kind_of(&self, ssrc: u32) -> Option<PacketKind> {
        if ssrc == 0 {
            return None;
        }
        if ssrc == self.video() {
            Some(PacketKind::Video)
        } else if ssrc == self.audio() {
            Some(PacketKind::Audio)
        } else {
            None
        }
    }

    /// Record `ssrc` for `kind` if that slot is still unknown
    pub fn learn(&self, kind: PacketKind, ssrc: u32) -> bool {
        let slot = match kind {
            PacketKind::Audio => &self.audio,
            PacketKind::Video => &self.video,
            PacketKind::Other => return false,
        };
        ssrc != 0
            && slot
                .compare_exchange(0, ssrc, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }
}

/// Result of pushing one inbound packet through the pipeline
#[derive(Debug, Default)]
pub struct Inbound {
    /// Packets to put back on the wire
    pub replays: Vec<DataPacket>,
    /// Packet that continues to demultiplexing, if any
    pub forward: Option<DataPacket>,
    /// Whether the packet was a NACK, and whether it was fully answered
    pub nack: Option<bool>,
}

/// Packet buffer plus retransmission handler for one bridge stream
#[derive(Debug)]
pub struct Pipeline {
    buffer: Mutex<PacketBuffer>,
    retransmission: RetransmissionHandler,
    ssrcs: SsrcTable,
}

impl Pipeline {
    pub fn new(buffer_size: usize, retransmission: bool, ssrcs: SsrcTable) -> Self {
        Self {
            buffer: Mutex::new(PacketBuffer::with_capacity(buffer_size)),
            retransmission: RetransmissionHandler::new(retransmission),
            ssrcs,
        }
    }

    pub fn ssrcs(&self) -> &SsrcTable {
        &self.ssrcs
    }

    pub fn retransmission(&self) -> &RetransmissionHandler {
        &self.retransmission
    }

    /// Inbound direction
    pub fn read(&self, packet: DataPacket) -> Inbound {
        let response = {
            let buffer = self.buffer.lock();
            self.retransmission
                .handle_read(&packet, &buffer, &self.ssrcs)
        };

        Inbound {
            nack: response.contained_nack.then_some(!response.forward),
            replays: response.replays,
            forward: response.forward.then_some(packet),
        }
    }

    /// Outbound direction; RTP packets are remembered for replay
    pub fn write(&self, packet: DataPacket) -> DataPacket {
        if !packet.is_rtcp() {
            self.buffer.lock().insert(&packet);
        }
        packet
    }

    pub fn buffered(&self, kind: PacketKind) -> usize {
        self.buffer.lock().len(kind)
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}
