//! Bridge datagram framing
//!
//! ```text
//! +--------------------------+------------------------------+
//! | stream id (18 bytes)     | RTP or RTCP payload          |
//! +--------------------------+------------------------------+
//! ```
//!
//! The stream id is opaque: it only selects which `BridgeMediaStream` on the
//! receiving process gets the payload. Ids shorter than the header width are
//! zero-padded.

use bytes::{Bytes, BytesMut};

use super::config::STREAM_ID_LEN;
use crate::error::{Error, Result};

/// Fixed-width routing id carried in every bridge datagram
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId([u8; STREAM_ID_LEN]);

impl StreamId {
    /// Build from a textual id of at most 18 bytes
    pub fn new(id: &str) -> Result<Self> {
        let raw = id.as_bytes();
        if raw.is_empty() || raw.len() > STREAM_ID_LEN {
            return Err(Error::InvalidStreamId(id.to_string()));
        }
        let mut bytes = [0u8; STREAM_ID_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self(bytes))
    }

    /// Read the id from the front of a datagram
    pub fn from_datagram(datagram: &[u8]) -> Option<Self> {
        let header = datagram.get(..STREAM_ID_LEN)?;
        let mut bytes = [0u8; STREAM_ID_LEN];
        bytes.copy_from_slice(header);
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; STREAM_ID_LEN] {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        f.write_str(&String::from_utf8_lossy(&self.0[..end]))
    }
}

impl std::fmt::Debug for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamId({})", self)
    }
}

/// Prefix `payload` with the stream id, reusing `buf`'s allocation
///
/// Returns `None` unless header plus payload is below `mtu`, the largest
/// datagram the receive loop keeps.
pub fn add_bridge_header(
    buf: &mut BytesMut,
    id: &StreamId,
    payload: &[u8],
    mtu: usize,
) -> Option<Bytes> {
    let total = payload.len() + STREAM_ID_LEN;
    if total >= mtu {
        return None;
    }
    buf.clear();
    buf.reserve(total);
    buf.extend_from_slice(id.as_bytes());
    buf.extend_from_slice(payload);
    Some(buf.split().freeze())
}

/// Strip the stream id from a received datagram
///
/// Returns `None` for datagrams shorter than the header or whose payload
/// exceeds `mtu`.
pub fn remove_bridge_header(datagram: &Bytes, mtu: usize) -> Option<Bytes> {
    let payload_len = datagram.len().checked_sub(STREAM_ID_LEN)?;
    if payload_len > mtu {
        return None;
    }
    Some(datagram.slice(STREAM_ID_LEN..))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::config::MTU_SIZE;

    fn id(s: &str) -> StreamId {
        StreamId::new(s).unwrap()
    }

    #[test]
    fn test_stream_id_padding() {
        let short = id("abc");
        assert_eq!(&short.as_bytes()[..3], b"abc");
        assert!(short.as_bytes()[3..].iter().all(|b| *b == 0));
        assert_eq!(short.to_string(), "abc");
    }

    #[test]
    fn test_stream_id_full_width() {
        let full = id("123456789012345678");
        assert_eq!(full.as_bytes(), b"123456789012345678");
        assert_eq!(full.to_string(), "123456789012345678");
    }

    #[test]
    fn test_stream_id_rejects_long_and_empty() {
        assert!(StreamId::new("1234567890123456789").is_err());
        assert!(StreamId::new("").is_err());
    }

    #[test]
    fn test_stream_id_from_datagram() {
        let stream = id("bridge-a");
        let mut buf = BytesMut::new();
        let datagram = add_bridge_header(&mut buf, &stream, b"payload", MTU_SIZE).unwrap();

        assert_eq!(StreamId::from_datagram(&datagram), Some(stream));
        assert_eq!(StreamId::from_datagram(&datagram[..10]), None);
    }

    #[test]
    fn test_header_round_trip_all_lengths() {
        let stream = id("s1");
        let mut buf = BytesMut::with_capacity(MTU_SIZE);
        let source: Vec<u8> = (0..MTU_SIZE).map(|i| (i % 251) as u8).collect();

        for len in 0..MTU_SIZE - STREAM_ID_LEN {
            let payload = &source[..len];
            let framed = add_bridge_header(&mut buf, &stream, payload, MTU_SIZE).unwrap();
            assert_eq!(framed.len(), len + STREAM_ID_LEN);

            let stripped = remove_bridge_header(&framed, MTU_SIZE).unwrap();
            assert_eq!(&stripped[..], payload);
        }
    }

    #[test]
    fn test_add_header_mtu_guard() {
        let stream = id("s1");
        let mut buf = BytesMut::new();

        let fits = vec![0u8; MTU_SIZE - STREAM_ID_LEN - 1];
        let fills_mtu = vec![0u8; MTU_SIZE - STREAM_ID_LEN];

        let framed = add_bridge_header(&mut buf, &stream, &fits, MTU_SIZE).unwrap();
        assert_eq!(framed.len(), MTU_SIZE - 1);
        // a full MTU datagram would be dropped on receive
        assert!(add_bridge_header(&mut buf, &stream, &fills_mtu, MTU_SIZE).is_none());
    }

    #[test]
    fn test_remove_header_mtu_guard() {
        let at_limit = Bytes::from(vec![0u8; MTU_SIZE + STREAM_ID_LEN]);
        let over = Bytes::from(vec![0u8; MTU_SIZE + STREAM_ID_LEN + 1]);

        assert!(remove_bridge_header(&at_limit, MTU_SIZE).is_some());
        assert!(remove_bridge_header(&over, MTU_SIZE).is_none());
    }

    #[test]
    fn test_remove_header_short_datagram() {
        let short = Bytes::from_static(b"tiny");
        assert!(remove_bridge_header(&short, MTU_SIZE).is_none());
    }
}
