//! Packet types relayed between sinks
//!
//! A `DataPacket` is one RTP or RTCP datagram payload tagged with the media
//! kind it was delivered as. Packets are cheap to clone: the payload is a
//! reference-counted `Bytes`, so fan-out to many sinks never copies media.

use bytes::Bytes;

use super::rtp;

/// Media kind a packet travels as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Audio RTP or audio-related RTCP
    Audio,
    /// Video RTP or video-related RTCP
    Video,
    /// Not yet classified
    Other,
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Audio => "audio",
            PacketKind::Video => "video",
            PacketKind::Other => "other",
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single RTP/RTCP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Media kind
    pub kind: PacketKind,
    /// Raw packet bytes (zero-copy via reference counting)
    pub data: Bytes,
}

impl DataPacket {
    /// Create a packet of the given kind
    pub fn new(kind: PacketKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Create an audio packet
    pub fn audio(data: impl Into<Bytes>) -> Self {
        Self::new(PacketKind::Audio, data)
    }

    /// Create a video packet
    pub fn video(data: impl Into<Bytes>) -> Self {
        Self::new(PacketKind::Video, data)
    }

    /// Create an unclassified packet
    pub fn other(data: impl Into<Bytes>) -> Self {
        Self::new(PacketKind::Other, data)
    }

    /// Same bytes, different kind
    pub fn with_kind(&self, kind: PacketKind) -> Self {
        Self {
            kind,
            data: self.data.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload is RTCP
    pub fn is_rtcp(&self) -> bool {
        rtp::is_rtcp(&self.data)
    }
}
