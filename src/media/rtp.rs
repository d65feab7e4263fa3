//! RTP and RTCP header inspection
//!
//! The relay never rewrites media; it only reads enough of each header to
//! demultiplex by SSRC and to decode NACK feedback.
//!
//! RTP fixed header (RFC 3550):
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! RTCP feedback header (RFC 4585), one block of a compound packet:
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|   FMT   |       PT      |          length               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  SSRC of packet sender                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  SSRC of media source                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! :            Feedback Control Information (FCI)                 :
//! ```

/// Length of the RTP fixed header
pub const RTP_HEADER_LEN: usize = 12;

/// Length of the common RTCP header (V/P/count, PT, length, sender SSRC)
pub const RTCP_HEADER_LEN: usize = 8;

/// Lowest second-byte value treated as RTCP
pub const RTCP_MIN_PT: u8 = 194;

/// Highest second-byte value treated as RTCP
pub const RTCP_MAX_PT: u8 = 223;

/// Offset of the first FCI entry in a feedback block
pub const FEEDBACK_FCI_OFFSET: usize = 12;

/// FMT value of a generic NACK inside an RTPFB block
pub const GENERIC_NACK_FMT: u8 = 1;

/// RTCP packet types the relay distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    Application = 204,
    /// Transport layer feedback (NACK, TMMBR)
    RtpFeedback = 205,
    /// Payload specific feedback (PLI, FIR, REMB)
    PayloadFeedback = 206,
}

impl RtcpPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            200 => Some(RtcpPacketType::SenderReport),
            201 => Some(RtcpPacketType::ReceiverReport),
            202 => Some(RtcpPacketType::SourceDescription),
            203 => Some(RtcpPacketType::Goodbye),
            204 => Some(RtcpPacketType::Application),
            205 => Some(RtcpPacketType::RtpFeedback),
            206 => Some(RtcpPacketType::PayloadFeedback),
            _ => None,
        }
    }

    /// Receiver reports and the two feedback families travel upstream
    pub fn is_feedback(&self) -> bool {
        matches!(
            self,
            RtcpPacketType::ReceiverReport
                | RtcpPacketType::RtpFeedback
                | RtcpPacketType::PayloadFeedback
        )
    }
}

/// Check whether a datagram payload is RTCP rather than RTP
pub fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= 2 && (RTCP_MIN_PT..=RTCP_MAX_PT).contains(&data[1])
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Borrowed view over an RTP header
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader<'a> {
    data: &'a [u8],
}

impl<'a> RtpHeader<'a> {
    /// Returns `None` when the buffer is shorter than the fixed header
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < RTP_HEADER_LEN {
            return None;
        }
        Some(Self { data })
    }

    pub fn version(&self) -> u8 {
        self.data[0] >> 6
    }

    pub fn marker(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.data[1] & 0x7F
    }

    pub fn sequence_number(&self) -> u16 {
        read_u16(self.data, 2)
    }

    pub fn timestamp(&self) -> u32 {
        read_u32(self.data, 4)
    }

    pub fn ssrc(&self) -> u32 {
        read_u32(self.data, 8)
    }
}

/// Borrowed view over one RTCP block
#[derive(Debug, Clone, Copy)]
pub struct RtcpHeader<'a> {
    data: &'a [u8],
}

impl<'a> RtcpHeader<'a> {
    /// Returns `None` when the buffer is shorter than the common header
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < RTCP_HEADER_LEN {
            return None;
        }
        Some(Self { data })
    }

    /// Report count, or FMT for feedback packets
    pub fn count(&self) -> u8 {
        self.data[0] & 0x1F
    }

    pub fn packet_type(&self) -> u8 {
        self.data[1]
    }

    pub fn kind(&self) -> Option<RtcpPacketType> {
        RtcpPacketType::from_byte(self.packet_type())
    }

    /// Length field: block size in 32-bit words minus one
    pub fn length_words(&self) -> u16 {
        read_u16(self.data, 2)
    }

    /// Size of this block in bytes, header included
    pub fn block_len(&self) -> usize {
        (self.length_words() as usize + 1) * 4
    }

    /// SSRC of the packet sender
    pub fn ssrc(&self) -> u32 {
        read_u32(self.data, 4)
    }

    /// SSRC of the media source (feedback) or of the first report block
    pub fn source_ssrc(&self) -> Option<u32> {
        (self.data.len() >= 12).then(|| read_u32(self.data, 8))
    }

    pub fn is_feedback(&self) -> bool {
        self.kind().map(|k| k.is_feedback()).unwrap_or(false)
    }

    pub fn is_generic_nack(&self) -> bool {
        self.kind() == Some(RtcpPacketType::RtpFeedback) && self.count() == GENERIC_NACK_FMT
    }
}

/// Iterator over the blocks of a compound RTCP packet
///
/// Stops at the first block whose declared length runs past the buffer.
#[derive(Debug, Clone)]
pub struct RtcpBlocks<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for RtcpBlocks<'a> {
    type Item = RtcpHeader<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.offset..)?;
        let header = RtcpHeader::parse(rest)?;
        let len = header.block_len();
        if len > rest.len() {
            return None;
        }
        self.offset += len;
        RtcpHeader::parse(&rest[..len])
    }
}

/// Walk the blocks of a (possibly compound) RTCP packet
pub fn rtcp_blocks(data: &[u8]) -> RtcpBlocks<'_> {
    RtcpBlocks { data, offset: 0 }
}

/// One generic NACK FCI entry: a packet id plus a bitmask of following losses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackItem {
    /// Packet ID (first lost sequence number)
    pub pid: u16,
    /// Bitmask of following lost packets; bit i means `pid + i + 1`
    pub blp: u16,
}

impl NackItem {
    /// All sequence numbers this entry reports lost, in ascending order
    pub fn lost_sequence_numbers(&self) -> impl Iterator<Item = u16> + '_ {
        let pid = self.pid;
        let blp = self.blp;
        std::iter::once(pid).chain(
            (0..16u16)
                .filter(move |bit| blp & (1 << bit) != 0)
                .map(move |bit| pid.wrapping_add(bit + 1)),
        )
    }
}

/// Decode the FCI entries of a generic NACK block
pub fn nack_items<'a>(block: &RtcpHeader<'a>) -> impl Iterator<Item = NackItem> + 'a {
    let data = block.data;
    let end = block.block_len().min(data.len());
    (FEEDBACK_FCI_OFFSET..end)
        .step_by(4)
        .filter(move |at| at + 4 <= end)
        .map(move |at| NackItem {
            pid: read_u16(data, at),
            blp: read_u16(data, at + 2),
        })
}
