//! One relayed stream on the bridge transport
//!
//! A `BridgeMediaStream` sits between the local fan-out graph and the UDP
//! bridge. Its behaviour depends on the direction it was created for:
//!
//! ```text
//!  Send mode (local media leaves the process)
//!    local publisher fan-out ──► deliver_audio/video ──► buffer ──► wire
//!    wire ──► NACK replay / feedback ──► feedback route ──► local publisher
//!
//!  Receive mode (remote media enters the process)
//!    wire ──► demux by SSRC ──► media sink (local fan-out) ──► subscribers
//!    subscribers ──► deliver_feedback ──► wire
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};

use super::config::MTU_SIZE;
use super::header::{add_bridge_header, remove_bridge_header, StreamId};
use super::io::BridgeTransport;
use super::pipeline::{Pipeline, SsrcTable};
use crate::error::{Error, Result};
use crate::media::rtp::{RtcpHeader, RtpHeader};
use crate::media::{
    DataPacket, FeedbackSink, MediaSink, MediaSource, PacketKind, DEFAULT_PACKET_BUFFER_SIZE,
};
use crate::stats::{BridgeStreamSnapshot, BridgeStreamStats};
use crate::worker::WorkerLease;

/// Direction a bridge stream relays in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// Local media is forwarded to the remote endpoint
    Send,
    /// Remote media is ingested and re-broadcast locally
    Receive,
}

impl BridgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMode::Send => "send",
            BridgeMode::Receive => "receive",
        }
    }
}

impl std::fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a remote bridge endpoint
pub fn remote_addr(ip: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| Error::InvalidAddress(format!("{}:{}", ip, port)))?;
    Ok(SocketAddr::new(ip, port))
}

/// Construction parameters for a bridge stream
#[derive(Debug, Clone)]
pub struct BridgeStreamOptions {
    pub stream_id: String,
    pub remote: SocketAddr,
    pub mode: BridgeMode,
    pub audio_ssrc: u32,
    pub video_ssrc: u32,
    pub packet_buffer_size: usize,
    pub retransmission: bool,
    pub mtu: usize,
}

impl BridgeStreamOptions {
    pub fn new(stream_id: impl Into<String>, remote: SocketAddr, mode: BridgeMode) -> Self {
        Self {
            stream_id: stream_id.into(),
            remote,
            mode,
            audio_ssrc: 0,
            video_ssrc: 0,
            packet_buffer_size: DEFAULT_PACKET_BUFFER_SIZE,
            retransmission: true,
            mtu: MTU_SIZE,
        }
    }

    pub fn ssrcs(mut self, audio: u32, video: u32) -> Self {
        self.audio_ssrc = audio;
        self.video_ssrc = video;
        self
    }

    pub fn packet_buffer_size(mut self, size: usize) -> Self {
        self.packet_buffer_size = size;
        self
    }

    pub fn retransmission(mut self, enabled: bool) -> Self {
        self.retransmission = enabled;
        self
    }

    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }
}

/// Framing, demultiplexing and role-dependent delivery for one bridge stream
pub struct BridgeMediaStream {
    id: StreamId,
    name: String,
    remote: SocketAddr,
    mode: BridgeMode,
    mtu: usize,
    transport: Weak<dyn BridgeTransport>,
    pipeline: Pipeline,
    send_buf: Mutex<BytesMut>,
    media_sink: RwLock<Option<Arc<dyn MediaSink>>>,
    feedback_route: RwLock<Option<Weak<dyn FeedbackSink>>>,
    worker: Option<WorkerLease>,
    self_ref: Weak<BridgeMediaStream>,
    closed: AtomicBool,
    stats: BridgeStreamStats,
}

impl BridgeMediaStream {
    /// Build a stream
    ///
    /// Inbound datagrams are processed on `worker` when one is given, inline
    /// on the receiving task otherwise.
    pub fn new(
        options: BridgeStreamOptions,
        transport: Weak<dyn BridgeTransport>,
        worker: Option<WorkerLease>,
    ) -> Result<Arc<Self>> {
        let id = StreamId::new(&options.stream_id)?;
        let ssrcs = SsrcTable::new(options.audio_ssrc, options.video_ssrc);
        let pipeline = Pipeline::new(options.packet_buffer_size, options.retransmission, ssrcs);

        Ok(Arc::new_cyclic(|self_ref| Self {
            id,
            name: options.stream_id,
            remote: options.remote,
            mode: options.mode,
            mtu: options.mtu,
            transport,
            pipeline,
            send_buf: Mutex::new(BytesMut::with_capacity(options.mtu)),
            media_sink: RwLock::new(None),
            feedback_route: RwLock::new(None),
            worker,
            self_ref: self_ref.clone(),
            closed: AtomicBool::new(false),
            stats: BridgeStreamStats::new(),
        }))
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    pub fn ssrcs(&self) -> &SsrcTable {
        self.pipeline.ssrcs()
    }

    pub fn stats(&self) -> BridgeStreamSnapshot {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Entry point for datagrams addressed to this stream
    pub fn on_datagram(&self, datagram: Bytes) {
        if self.is_closed() {
            return;
        }
        match (&self.worker, self.self_ref.upgrade()) {
            (Some(worker), Some(stream)) => {
                worker.task(move || stream.process_datagram(&datagram));
            }
            _ => self.process_datagram(&datagram),
        }
    }

    /// Deframe and handle one datagram on the current thread
    pub fn process_datagram(&self, datagram: &Bytes) {
        if self.is_closed() {
            return;
        }
        self.stats.record_received(datagram.len());

        let Some(payload) = remove_bridge_header(datagram, self.mtu) else {
            tracing::warn!(stream = %self.name, len = datagram.len(), "Bridge datagram too large");
            self.stats.record_oversize();
            return;
        };

        let inbound = self.pipeline.read(DataPacket::other(payload));
        for replay in &inbound.replays {
            self.transmit(replay);
        }
        if let Some(fully_recovered) = inbound.nack {
            self.stats
                .record_nack(!fully_recovered, inbound.replays.len());
        }
        if let Some(packet) = inbound.forward {
            self.demux(packet);
        }
    }

    fn demux(&self, packet: DataPacket) {
        let ssrcs = self.pipeline.ssrcs();

        if packet.is_rtcp() {
            let Some(header) = RtcpHeader::parse(&packet.data) else {
                return;
            };
            if header.is_feedback() {
                let source = header.source_ssrc().unwrap_or(0);
                let kind = ssrcs
                    .kind_of(source)
                    .or((source == 0).then_some(PacketKind::Audio));
                match kind {
                    Some(kind) => self.inbound_feedback(packet.with_kind(kind)),
                    None => self.unknown_ssrc("feedback", source),
                }
            } else {
                match ssrcs.kind_of(header.ssrc()) {
                    Some(kind) => self.inbound_media(packet.with_kind(kind)),
                    None => self.unknown_ssrc("rtcp", header.ssrc()),
                }
            }
            return;
        }

        let Some(header) = RtpHeader::parse(&packet.data) else {
            return;
        };
        match ssrcs.kind_of(header.ssrc()) {
            Some(kind) => self.inbound_media(packet.with_kind(kind)),
            None => self.unknown_ssrc("rtp", header.ssrc()),
        }
    }

    fn unknown_ssrc(&self, what: &'static str, ssrc: u32) {
        self.stats.record_unknown_ssrc();
        tracing::warn!(
            stream = %self.name,
            packet = what,
            ssrc = ssrc,
            audio_ssrc = self.pipeline.ssrcs().audio(),
            video_ssrc = self.pipeline.ssrcs().video(),
            "Unknown SSRC, dropping packet"
        );
    }

    fn inbound_media(&self, packet: DataPacket) {
        match self.mode {
            BridgeMode::Receive => {
                if let Err(e) = self.to_media_sink(packet) {
                    tracing::trace!(stream = %self.name, error = %e, "Media sink rejected packet");
                }
            }
            BridgeMode::Send => {
                tracing::debug!(stream = %self.name, "Media on a send bridge, dropping");
            }
        }
    }

    fn inbound_feedback(&self, packet: DataPacket) {
        match self.mode {
            BridgeMode::Send => {
                if let Err(e) = self.to_feedback_route(packet) {
                    tracing::trace!(stream = %self.name, error = %e, "Feedback not delivered");
                }
            }
            BridgeMode::Receive => {
                tracing::debug!(stream = %self.name, "Feedback on a receive bridge, dropping");
            }
        }
    }

    fn to_media_sink(&self, packet: DataPacket) -> Result<()> {
        let sink = self
            .media_sink
            .read()
            .clone()
            .ok_or(Error::Closed("bridge media sink"))?;
        match packet.kind {
            PacketKind::Audio => sink.deliver_audio(packet),
            _ => sink.deliver_video(packet),
        }
    }

    fn to_feedback_route(&self, packet: DataPacket) -> Result<()> {
        let route = self
            .feedback_route
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(Error::Closed("bridge feedback route"))?;
        route.deliver_feedback(packet)
    }

    /// Outbound media in send mode: learn the SSRC, buffer, send
    fn send_media(&self, packet: DataPacket) -> Result<()> {
        if let Some(header) = RtpHeader::parse(&packet.data) {
            if !packet.is_rtcp() && self.pipeline.ssrcs().learn(packet.kind, header.ssrc()) {
                tracing::debug!(
                    stream = %self.name,
                    kind = %packet.kind,
                    ssrc = header.ssrc(),
                    "Learned outbound SSRC"
                );
            }
        }
        let packet = self.pipeline.write(packet);
        self.transmit(&packet);
        Ok(())
    }

    fn transmit(&self, packet: &DataPacket) -> bool {
        let datagram = {
            let mut buf = self.send_buf.lock();
            add_bridge_header(&mut buf, &self.id, &packet.data, self.mtu)
        };
        let Some(datagram) = datagram else {
            self.stats.record_oversize();
            tracing::warn!(
                stream = %self.name,
                len = packet.len(),
                mtu = self.mtu,
                "Packet exceeds bridge MTU, dropping"
            );
            return false;
        };

        let Some(transport) = self.transport.upgrade() else {
            return false;
        };
        self.stats.record_sent(datagram.len());
        transport.send(self.remote, &self.id, datagram);
        true
    }

    fn deliver_local(&self, packet: DataPacket) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("bridge stream"));
        }
        match self.mode {
            BridgeMode::Send => self.send_media(packet),
            BridgeMode::Receive => self.to_media_sink(packet),
        }
    }

    /// Detach sinks and stop processing
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.media_sink.write() = None;
        *self.feedback_route.write() = None;
        self.pipeline.clear();

        let stats = self.stats.snapshot();
        tracing::debug!(
            stream = %self.name,
            mode = %self.mode,
            sent = stats.datagrams_sent,
            received = stats.datagrams_received,
            "Bridge stream closed"
        );
    }
}

impl MediaSink for BridgeMediaStream {
    fn deliver_audio(&self, packet: DataPacket) -> Result<()> {
        self.deliver_local(packet.with_kind(PacketKind::Audio))
    }

    fn deliver_video(&self, packet: DataPacket) -> Result<()> {
        self.deliver_local(packet.with_kind(PacketKind::Video))
    }

    fn set_feedback_sink(&self, sink: Option<Weak<dyn FeedbackSink>>) {
        *self.feedback_route.write() = sink;
    }

    fn close(&self) {
        BridgeMediaStream::close(self)
    }
}

impl FeedbackSink for BridgeMediaStream {
    fn deliver_feedback(&self, packet: DataPacket) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("bridge stream"));
        }
        match self.mode {
            BridgeMode::Receive => {
                let packet = self.pipeline.write(packet);
                self.transmit(&packet);
                Ok(())
            }
            BridgeMode::Send => self.to_feedback_route(packet),
        }
    }
}

impl MediaSource for BridgeMediaStream {
    fn set_media_sink(&self, sink: Option<Arc<dyn MediaSink>>) {
        *self.media_sink.write() = sink;
    }

    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        let stream: Arc<dyn FeedbackSink> = self.self_ref.upgrade()?;
        Some(stream)
    }
}

impl std::fmt::Debug for BridgeMediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMediaStream")
            .field("id", &self.name)
            .field("remote", &self.remote)
            .field("mode", &self.mode)
            .finish()
    }
}
