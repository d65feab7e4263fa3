//! Counters for bridge streams and the bridge transport
//!
//! Counters are updated lock-free on the media path; callers take a
//! point-in-time [`BridgeStreamSnapshot`] when they want to report them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one bridge stream
#[derive(Debug)]
pub struct BridgeStreamStats {
    started_at: Instant,
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    oversize_dropped: AtomicU64,
    unknown_ssrc_dropped: AtomicU64,
    nacks_consumed: AtomicU64,
    nacks_forwarded: AtomicU64,
    packets_replayed: AtomicU64,
}

impl BridgeStreamStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            oversize_dropped: AtomicU64::new(0),
            unknown_ssrc_dropped: AtomicU64::new(0),
            nacks_consumed: AtomicU64::new(0),
            nacks_forwarded: AtomicU64::new(0),
            packets_replayed: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_oversize(&self) {
        self.oversize_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_ssrc(&self) {
        self.unknown_ssrc_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one inbound NACK packet
    pub fn record_nack(&self, forwarded: bool, replayed: usize) {
        if forwarded {
            self.nacks_forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.nacks_consumed.fetch_add(1, Ordering::Relaxed);
        }
        self.packets_replayed
            .fetch_add(replayed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStreamSnapshot {
        BridgeStreamSnapshot {
            uptime: self.started_at.elapsed(),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            oversize_dropped: self.oversize_dropped.load(Ordering::Relaxed),
            unknown_ssrc_dropped: self.unknown_ssrc_dropped.load(Ordering::Relaxed),
            nacks_consumed: self.nacks_consumed.load(Ordering::Relaxed),
            nacks_forwarded: self.nacks_forwarded.load(Ordering::Relaxed),
            packets_replayed: self.packets_replayed.load(Ordering::Relaxed),
        }
    }
}

impl Default for BridgeStreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BridgeStreamStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStreamSnapshot {
    pub uptime: Duration,
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    /// Packets that would not fit the transport MTU
    pub oversize_dropped: u64,
    /// Packets whose SSRC matched neither audio nor video
    pub unknown_ssrc_dropped: u64,
    /// NACKs fully answered from the packet buffer
    pub nacks_consumed: u64,
    /// NACKs passed upstream because some packets were missing
    pub nacks_forwarded: u64,
    pub packets_replayed: u64,
}

impl BridgeStreamSnapshot {
    /// Inbound bitrate in bits per second over the stream lifetime
    pub fn receive_bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}

/// Transport-wide counters kept by `BridgeIo`
#[derive(Debug, Default)]
pub struct TransportStats {
    unknown_stream_dropped: AtomicU64,
    send_errors: AtomicU64,
}

impl TransportStats {
    pub fn record_unknown_stream(&self) {
        self.unknown_stream_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_stream_dropped(&self) -> u64 {
        self.unknown_stream_dropped.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = BridgeStreamStats::new();
        stats.record_received(100);
        stats.record_received(50);
        stats.record_sent(40);
        stats.record_oversize();
        stats.record_unknown_ssrc();
        stats.record_nack(false, 3);
        stats.record_nack(true, 2);

        let snap = stats.snapshot();
        assert_eq!(snap.datagrams_received, 2);
        assert_eq!(snap.bytes_received, 150);
        assert_eq!(snap.datagrams_sent, 1);
        assert_eq!(snap.bytes_sent, 40);
        assert_eq!(snap.oversize_dropped, 1);
        assert_eq!(snap.unknown_ssrc_dropped, 1);
        assert_eq!(snap.nacks_consumed, 1);
        assert_eq!(snap.nacks_forwarded, 1);
        assert_eq!(snap.packets_replayed, 5);
    }

    #[test]
    fn test_receive_bitrate() {
        let snap = BridgeStreamSnapshot {
            uptime: Duration::from_secs(2),
            bytes_received: 1000,
            ..Default::default()
        };
        assert_eq!(snap.receive_bitrate(), 4000);

        let fresh = BridgeStreamSnapshot::default();
        assert_eq!(fresh.receive_bitrate(), 0);
    }

    #[test]
    fn test_transport_stats() {
        let stats = TransportStats::default();
        stats.record_unknown_stream();
        stats.record_send_error();
        stats.record_send_error();
        assert_eq!(stats.unknown_stream_dropped(), 1);
        assert_eq!(stats.send_errors(), 2);
    }
}
