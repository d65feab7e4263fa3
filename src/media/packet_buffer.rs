//! Short-term history of transmitted RTP packets
//!
//! Keeps the most recent packets per media kind in a fixed ring indexed by
//! `sequence_number % capacity`, so a NACK can be answered without asking
//! the original sender. A slot is overwritten once the sequence space wraps
//! past it; callers must compare the stored packet's sequence number with the
//! one they asked for.

use super::packet::{DataPacket, PacketKind};
use super::rtp::RtpHeader;

/// Default number of packets kept per media kind
pub const DEFAULT_PACKET_BUFFER_SIZE: usize = 256;

/// Per-kind ring buffers of outbound RTP packets
#[derive(Debug)]
pub struct PacketBuffer {
    capacity: usize,
    audio: Vec<Option<DataPacket>>,
    video: Vec<Option<DataPacket>>,
}

impl PacketBuffer {
    /// Create a buffer with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PACKET_BUFFER_SIZE)
    }

    /// Create a buffer holding `capacity` packets per media kind
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            audio: vec![None; capacity],
            video: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ring(&self, kind: PacketKind) -> Option<&Vec<Option<DataPacket>>> {
        match kind {
            PacketKind::Audio => Some(&self.audio),
            PacketKind::Video => Some(&self.video),
            PacketKind::Other => None,
        }
    }

    fn ring_mut(&mut self, kind: PacketKind) -> Option<&mut Vec<Option<DataPacket>>> {
        match kind {
            PacketKind::Audio => Some(&mut self.audio),
            PacketKind::Video => Some(&mut self.video),
            PacketKind::Other => None,
        }
    }

    /// Remember an outbound packet
    ///
    /// RTCP, unclassified and truncated packets are ignored. Returns whether
    /// the packet was stored.
    pub fn insert(&mut self, packet: &DataPacket) -> bool {
        if packet.is_rtcp() {
            return false;
        }
        let Some(seq) = RtpHeader::parse(&packet.data).map(|h| h.sequence_number()) else {
            return false;
        };

        let slot = seq as usize % self.capacity;
        match self.ring_mut(packet.kind) {
            Some(ring) => {
                ring[slot] = Some(packet.clone());
                true
            }
            None => false,
        }
    }

    /// Packet stored in the slot for `seq`, whatever its actual sequence number
    pub fn slot(&self, kind: PacketKind, seq: u16) -> Option<&DataPacket> {
        self.ring(kind)?[seq as usize % self.capacity].as_ref()
    }

    /// Packet with exactly sequence number `seq`, if still buffered
    pub fn get(&self, kind: PacketKind, seq: u16) -> Option<&DataPacket> {
        self.slot(kind, seq).filter(|packet| {
            RtpHeader::parse(&packet.data)
                .map(|h| h.sequence_number() == seq)
                .unwrap_or(false)
        })
    }

    /// Drop all buffered packets
    pub fn clear(&mut self) {
        self.audio.iter_mut().for_each(|slot| *slot = None);
        self.video.iter_mut().for_each(|slot| *slot = None);
    }

    /// Number of occupied slots for a kind
    pub fn len(&self, kind: PacketKind) -> usize {
        self.ring(kind)
            .map(|ring| ring.iter().filter(|slot| slot.is_some()).count())
            .unwrap_or(0)
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}
