//! NACK-driven retransmission from the local packet buffer
//!
//! Inbound RTCP is scanned for generic NACK blocks (RTPFB, FMT 1). Every
//! sequence number a NACK reports lost is looked up in the packet buffer of
//! the media kind whose SSRC matches the NACK's media source; packets found
//! with an exactly matching sequence number are replayed on the outbound
//! path. A NACK that was answered in full is consumed. If anything could not
//! be found locally the NACK is still passed upstream so the original sender
//! can retransmit.

use std::sync::atomic::{AtomicBool, Ordering};

use super::pipeline::SsrcTable;
use crate::media::rtp::{self, rtcp_blocks, RtcpHeader};
use crate::media::{DataPacket, PacketBuffer};

/// Outcome of running one inbound packet through the handler
#[derive(Debug, Default)]
pub struct NackResponse {
    /// Buffered packets to send again, in request order
    pub replays: Vec<DataPacket>,
    /// Whether the inbound packet continues up the read path
    pub forward: bool,
    /// Whether the packet carried at least one generic NACK
    pub contained_nack: bool,
}

/// Answers NACKs from the packet buffer
#[derive(Debug)]
pub struct RetransmissionHandler {
    enabled: AtomicBool,
}

impl RetransmissionHandler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Inspect an inbound packet and collect replays for any NACK it carries
    pub fn handle_read(
        &self,
        packet: &DataPacket,
        buffer: &PacketBuffer,
        ssrcs: &SsrcTable,
    ) -> NackResponse {
        let mut response = NackResponse {
            forward: true,
            ..Default::default()
        };
        if !self.is_enabled() || !packet.is_rtcp() {
            return response;
        }

        let mut fully_recovered = true;
        for block in rtcp_blocks(&packet.data) {
            if !block.is_generic_nack() {
                continue;
            }
            response.contained_nack = true;
            if !self.replay_block(&block, buffer, ssrcs, &mut response.replays) {
                fully_recovered = false;
            }
        }

        response.forward = !response.contained_nack || !fully_recovered;
        response
    }

    fn replay_block(
        &self,
        block: &RtcpHeader<'_>,
        buffer: &PacketBuffer,
        ssrcs: &SsrcTable,
        replays: &mut Vec<DataPacket>,
    ) -> bool {
        let source = block.source_ssrc().unwrap_or(0);
        let Some(kind) = ssrcs.kind_of(source) else {
            tracing::debug!(source_ssrc = source, "NACK for unknown SSRC");
            return false;
        };

        let mut recovered = true;
        for item in rtp::nack_items(block) {
            for seq in item.lost_sequence_numbers() {
                match buffer.get(kind, seq) {
                    Some(found) => {
                        tracing::trace!(kind = %kind, seq = seq, "Replaying buffered packet");
                        replays.push(found.clone());
                    }
                    None => {
                        tracing::trace!(kind = %kind, seq = seq, "NACKed packet not buffered");
                        recovered = false;
                    }
                }
            }
        }
        recovered
    }
}

impl Default for RetransmissionHandler {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::test_packets::{nack, pli, rtp};
    use crate::media::PacketKind;

    const VIDEO_SSRC: u32 = 0x1111;
    const AUDIO_SSRC: u32 = 0x2222;

    fn buffer_with(kind: PacketKind, ssrc: u32, seqs: &[u16]) -> PacketBuffer {
        let mut buffer = PacketBuffer::new();
        for seq in seqs {
            buffer.insert(&DataPacket::new(kind, rtp(96, *seq, ssrc, 16)));
        }
        buffer
    }

    fn seqs(packets: &[DataPacket]) -> Vec<u16> {
        packets
            .iter()
            .map(|p| crate::media::RtpHeader::parse(&p.data).unwrap().sequence_number())
            .collect()
    }

    #[test]
    fn test_full_recovery_consumes_nack() {
        let handler = RetransmissionHandler::default();
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let buffer = buffer_with(PacketKind::Video, VIDEO_SSRC, &[100, 101, 102]);
        let request = DataPacket::other(nack(9, VIDEO_SSRC, &[(100, 0b11)]));

        let response = handler.handle_read(&request, &buffer, &ssrcs);

        assert!(response.contained_nack);
        assert_eq!(seqs(&response.replays), vec![100, 101, 102]);
        assert!(!response.forward);
    }

    #[test]
    fn test_partial_recovery_forwards_nack() {
        let handler = RetransmissionHandler::default();
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let buffer = buffer_with(PacketKind::Video, VIDEO_SSRC, &[100, 102]);
        let request = DataPacket::other(nack(9, VIDEO_SSRC, &[(100, 0b11)]));

        let response = handler.handle_read(&request, &buffer, &ssrcs);

        assert_eq!(seqs(&response.replays), vec![100, 102]);
        assert!(response.forward);
    }

    #[test]
    fn test_audio_nack_uses_audio_buffer() {
        let handler = RetransmissionHandler::default();
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let mut buffer = buffer_with(PacketKind::Video, VIDEO_SSRC, &[5]);
        buffer.insert(&DataPacket::audio(rtp(111, 5, AUDIO_SSRC, 8)));
        let request = DataPacket::other(nack(9, AUDIO_SSRC, &[(5, 0)]));

        let response = handler.handle_read(&request, &buffer, &ssrcs);

        assert_eq!(response.replays.len(), 1);
        assert_eq!(response.replays[0].kind, PacketKind::Audio);
        assert!(!response.forward);
    }

    #[test]
    fn test_unknown_source_ssrc_forwards() {
        let handler = RetransmissionHandler::default();
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let buffer = buffer_with(PacketKind::Video, VIDEO_SSRC, &[100]);
        let request = DataPacket::other(nack(9, 0xBEEF, &[(100, 0)]));

        let response = handler.handle_read(&request, &buffer, &ssrcs);

        assert!(response.replays.is_empty());
        assert!(response.forward);
    }

    #[test]
    fn test_non_nack_rtcp_passes_through() {
        let handler = RetransmissionHandler::default();
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let buffer = PacketBuffer::new();
        let request = DataPacket::other(pli(9, VIDEO_SSRC));

        let response = handler.handle_read(&request, &buffer, &ssrcs);

        assert!(!response.contained_nack);
        assert!(response.forward);
    }

    #[test]
    fn test_rtp_passes_through() {
        let handler = RetransmissionHandler::default();
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let buffer = PacketBuffer::new();
        let media = DataPacket::video(rtp(96, 1, VIDEO_SSRC, 10));

        let response = handler.handle_read(&media, &buffer, &ssrcs);

        assert!(response.forward);
        assert!(response.replays.is_empty());
    }

    #[test]
    fn test_disabled_handler_forwards_everything() {
        let handler = RetransmissionHandler::new(false);
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let buffer = buffer_with(PacketKind::Video, VIDEO_SSRC, &[100]);
        let request = DataPacket::other(nack(9, VIDEO_SSRC, &[(100, 0)]));

        let response = handler.handle_read(&request, &buffer, &ssrcs);

        assert!(response.forward);
        assert!(response.replays.is_empty());
    }

    #[test]
    fn test_multiple_fci_entries() {
        let handler = RetransmissionHandler::default();
        let ssrcs = SsrcTable::new(AUDIO_SSRC, VIDEO_SSRC);
        let buffer = buffer_with(PacketKind::Video, VIDEO_SSRC, &[10, 40, 41]);
        let request = DataPacket::other(nack(9, VIDEO_SSRC, &[(10, 0), (40, 0b1)]));

        let response = handler.handle_read(&request, &buffer, &ssrcs);

        assert_eq!(seqs(&response.replays), vec![10, 40, 41]);
        assert!(!response.forward);
    }
}
