//! In-process doubles for unit tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::bridge::{BridgeConfig, BridgeIo, BridgeTransport, StreamId};
use crate::control::{BridgeStreamInfo, Layer, LayerRef, MixerConfig};
use crate::error::{Error, Result};
use crate::external::{
    ChannelBus, MessageBus, Mixer, MixerFactory, Recorder, RecorderFactory, RecorderParams, SessionEventKind,
    SessionEvents, SessionParams, WebRtcSession, WebRtcSessionFactory,
};
use crate::media::{DataPacket, FeedbackSink, MediaSink, MediaSource};
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::server::RelayConfig;
use crate::session::{Connection, ConnectionContext, NodeContext, SubscriptionSource};
use crate::worker::WorkerPool;

/// Sink that remembers what it was given
#[derive(Default)]
pub struct RecordingSink {
    audio: Mutex<Vec<DataPacket>>,
    video: Mutex<Vec<DataPacket>>,
    feedback: Mutex<Option<Weak<dyn FeedbackSink>>>,
    closes: AtomicUsize,
    failing: bool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink that rejects every packet
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    pub fn audio_count(&self) -> usize {
        self.audio.lock().len()
    }

    pub fn video_count(&self) -> usize {
        self.video.lock().len()
    }

    pub fn video_packets(&self) -> Vec<DataPacket> {
        self.video.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn has_feedback_route(&self) -> bool {
        self.feedback
            .lock()
            .as_ref()
            .is_some_and(|route| route.upgrade().is_some())
    }

    /// Push feedback back along the route the fan-out installed
    pub fn send_feedback(&self, packet: DataPacket) -> Result<()> {
        let route = self
            .feedback
            .lock()
            .as_ref()
            .and_then(|route| route.upgrade())
            .ok_or(Error::Closed("feedback route"))?;
        route.deliver_feedback(packet)
    }
}

impl MediaSink for RecordingSink {
    fn deliver_audio(&self, packet: DataPacket) -> Result<()> {
        if self.failing {
            return Err(Error::Closed("recording sink"));
        }
        self.audio.lock().push(packet);
        Ok(())
    }

    fn deliver_video(&self, packet: DataPacket) -> Result<()> {
        if self.failing {
            return Err(Error::Closed("recording sink"));
        }
        self.video.lock().push(packet);
        Ok(())
    }

    fn set_feedback_sink(&self, sink: Option<Weak<dyn FeedbackSink>>) {
        *self.feedback.lock() = sink;
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingFeedback {
    packets: Mutex<Vec<DataPacket>>,
}

impl RecordingFeedback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn packets(&self) -> Vec<DataPacket> {
        self.packets.lock().clone()
    }
}

impl FeedbackSink for RecordingFeedback {
    fn deliver_feedback(&self, packet: DataPacket) -> Result<()> {
        self.packets.lock().push(packet);
        Ok(())
    }
}

/// Source whose feedback lands in a [`RecordingFeedback`]
pub struct TestSource {
    sink: Mutex<Option<Arc<dyn MediaSink>>>,
    feedback: Arc<RecordingFeedback>,
}

impl TestSource {
    pub fn new(feedback: Arc<RecordingFeedback>) -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(None),
            feedback,
        })
    }
}

impl MediaSource for TestSource {
    fn set_media_sink(&self, sink: Option<Arc<dyn MediaSink>>) {
        *self.sink.lock() = sink;
    }

    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        Some(self.feedback.clone())
    }
}

/// Transport that records framed datagrams instead of sending them
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Bytes)> {
        self.sent.lock().clone()
    }
}

impl BridgeTransport for RecordingTransport {
    fn send(&self, remote: SocketAddr, _stream_id: &StreamId, datagram: Bytes) {
        self.sent.lock().push((remote, datagram));
    }
}

/// WebRTC session double
///
/// `init` raises `Initial`; `set_remote_sdp` raises `SdpProcessed` with a
/// canned answer followed by `Ready`.
pub struct FakeSession {
    params: SessionParams,
    events: SessionEvents,
    fail_init: bool,
    media_sink: Mutex<Option<Arc<dyn MediaSink>>>,
    sdps: Mutex<Vec<String>>,
    candidates: Mutex<Vec<(String, i32, String)>>,
    received: AtomicUsize,
    closed: AtomicBool,
    self_ref: Weak<FakeSession>,
}

impl FakeSession {
    pub const VIDEO_SSRC: u32 = 0x1111;
    pub const AUDIO_SSRC: u32 = 0x2222;

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn produce_video(&self, packet: DataPacket) {
        if let Some(sink) = self.media_sink.lock().clone() {
            let _ = sink.deliver_video(packet);
        }
    }

    pub fn produce_audio(&self, packet: DataPacket) {
        if let Some(sink) = self.media_sink.lock().clone() {
            let _ = sink.deliver_audio(packet);
        }
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn sdps(&self) -> Vec<String> {
        self.sdps.lock().clone()
    }

    pub fn candidates(&self) -> Vec<(String, i32, String)> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl WebRtcSession for FakeSession {
    fn init(&self) -> Result<()> {
        if self.fail_init {
            return Err(Error::collaborator("webrtc", "init refused"));
        }
        self.events.notify(SessionEventKind::Initial, "");
        Ok(())
    }

    fn set_remote_sdp(&self, sdp: &str) -> Result<()> {
        self.sdps.lock().push(sdp.to_string());
        self.events.notify(SessionEventKind::SdpProcessed, "v=0 answer");
        self.events.notify(SessionEventKind::Ready, "");
        Ok(())
    }

    fn add_remote_candidate(&self, mid: &str, mline_index: i32, candidate: &str) -> Result<()> {
        self.candidates
            .lock()
            .push((mid.to_string(), mline_index, candidate.to_string()));
        Ok(())
    }

    fn remote_ssrcs(&self) -> (u32, u32) {
        (Self::VIDEO_SSRC, Self::AUDIO_SSRC)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.media_sink.lock() = None;
    }

    fn as_sink(self: Arc<Self>) -> Arc<dyn MediaSink> {
        self
    }

    fn as_source(self: Arc<Self>) -> Arc<dyn MediaSource> {
        self
    }
}

impl MediaSink for FakeSession {
    fn deliver_audio(&self, _packet: DataPacket) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deliver_video(&self, _packet: DataPacket) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MediaSource for FakeSession {
    fn set_media_sink(&self, sink: Option<Arc<dyn MediaSink>>) {
        *self.media_sink.lock() = sink;
    }

    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        let this = self.self_ref.upgrade()?;
        Some(this)
    }
}

impl FeedbackSink for FakeSession {
    fn deliver_feedback(&self, _packet: DataPacket) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSessionFactory {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    fail_init: bool,
}

impl FakeSessionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every session it creates refuses to initialize
    pub fn failing_init() -> Arc<Self> {
        Arc::new(Self {
            fail_init: true,
            ..Default::default()
        })
    }

    /// Most recent session created for `client_id` and `stream_id`
    pub fn session(&self, client_id: &str, stream_id: &str) -> Option<Arc<FakeSession>> {
        self.sessions
            .lock()
            .iter()
            .rev()
            .find(|s| s.params.client_id == client_id && s.params.stream_id == stream_id)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl WebRtcSessionFactory for FakeSessionFactory {
    fn create(
        &self,
        params: &SessionParams,
        events: SessionEvents,
    ) -> Result<Arc<dyn WebRtcSession>> {
        let session = Arc::new_cyclic(|self_ref| FakeSession {
            params: params.clone(),
            events,
            fail_init: self.fail_init,
            media_sink: Mutex::new(None),
            sdps: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            received: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}

pub struct FakeRecorder {
    params: RecorderParams,
    inited: AtomicBool,
    closed: AtomicBool,
    received: AtomicUsize,
}

impl FakeRecorder {
    pub fn params(&self) -> &RecorderParams {
        &self.params
    }

    pub fn is_inited(&self) -> bool {
        self.inited.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl Recorder for FakeRecorder {
    fn init(&self) -> Result<()> {
        self.inited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn as_sink(self: Arc<Self>) -> Arc<dyn MediaSink> {
        self
    }
}

impl MediaSink for FakeRecorder {
    fn deliver_audio(&self, _packet: DataPacket) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deliver_video(&self, _packet: DataPacket) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRecorderFactory {
    recorders: Mutex<HashMap<String, Arc<FakeRecorder>>>,
}

impl FakeRecorderFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recorder(&self, stream_id: &str) -> Option<Arc<FakeRecorder>> {
        self.recorders.lock().get(stream_id).cloned()
    }
}

impl RecorderFactory for FakeRecorderFactory {
    fn create(&self, params: &RecorderParams) -> Result<Arc<dyn Recorder>> {
        let recorder = Arc::new(FakeRecorder {
            params: params.clone(),
            inited: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            received: AtomicUsize::new(0),
        });
        self.recorders
            .lock()
            .insert(params.stream_id.clone(), recorder.clone());
        Ok(recorder)
    }
}

/// Mixer double; counts input per source stream
pub struct FakeMixer {
    config: Mutex<MixerConfig>,
    output: Mutex<Option<Arc<dyn MediaSink>>>,
    inputs: Mutex<HashMap<String, usize>>,
    added: AtomicUsize,
    removed: AtomicUsize,
    closed: AtomicBool,
}

impl FakeMixer {
    pub fn produce_video(&self, packet: DataPacket) {
        if let Some(sink) = self.output.lock().clone() {
            let _ = sink.deliver_video(packet);
        }
    }

    pub fn added_layers(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn removed_layers(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn input_count(&self, stream_id: &str) -> usize {
        self.inputs.lock().get(stream_id).copied().unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Mixer for FakeMixer {
    fn init(&self, config: &MixerConfig) -> Result<()> {
        *self.config.lock() = config.clone();
        Ok(())
    }

    fn add_mixer_layer(&self, layer: &Layer) -> Result<()> {
        self.added.fetch_add(1, Ordering::SeqCst);
        self.config.lock().layers.push(layer.clone());
        Ok(())
    }

    fn remove_mixer_layer(&self, layer: &LayerRef) -> Result<()> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        self.config.lock().layers.retain(|l| !l.same_slot(layer));
        Ok(())
    }

    fn mixer_config(&self) -> MixerConfig {
        self.config.lock().clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn layer_sink(self: Arc<Self>, stream_id: &str) -> Arc<dyn MediaSink> {
        Arc::new(FakeLayerSink {
            mixer: Arc::downgrade(&self),
            stream_id: stream_id.to_string(),
        })
    }

    fn as_source(self: Arc<Self>) -> Arc<dyn MediaSource> {
        self
    }
}

impl MediaSource for FakeMixer {
    fn set_media_sink(&self, sink: Option<Arc<dyn MediaSink>>) {
        *self.output.lock() = sink;
    }

    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        None
    }
}

struct FakeLayerSink {
    mixer: Weak<FakeMixer>,
    stream_id: String,
}

impl FakeLayerSink {
    fn count(&self) -> Result<()> {
        let mixer = self.mixer.upgrade().ok_or(Error::Closed("mixer"))?;
        *mixer.inputs.lock().entry(self.stream_id.clone()).or_default() += 1;
        Ok(())
    }
}

impl MediaSink for FakeLayerSink {
    fn deliver_audio(&self, _packet: DataPacket) -> Result<()> {
        self.count()
    }

    fn deliver_video(&self, _packet: DataPacket) -> Result<()> {
        self.count()
    }
}

#[derive(Default)]
pub struct FakeMixerFactory {
    mixers: Mutex<HashMap<String, Arc<FakeMixer>>>,
}

impl FakeMixerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mixer(&self, id: &str) -> Option<Arc<FakeMixer>> {
        self.mixers.lock().get(id).cloned()
    }
}

impl MixerFactory for FakeMixerFactory {
    fn create(&self, config: &MixerConfig) -> Result<Arc<dyn Mixer>> {
        let mixer = Arc::new(FakeMixer {
            config: Mutex::new(config.clone()),
            output: Mutex::new(None),
            inputs: Mutex::new(HashMap::new()),
            added: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.mixers.lock().insert(config.id.clone(), mixer.clone());
        Ok(mixer)
    }
}

/// Layer at index 0 for `stream_id`, fed by bridge `b_<stream_id>`
pub fn layer(stream_id: &str, sender_port: u16) -> Layer {
    Layer {
        stream_id: stream_id.to_string(),
        index: 0,
        width: 640,
        height: 360,
        off_x: 0,
        off_y: 0,
        audio_gain: 1.0,
        video_ssrc: 0,
        audio_ssrc: 0,
        bridge_stream: Some(BridgeStreamInfo {
            id: format!("b_{}", stream_id),
            room_id: "r1".into(),
            sender_erizo_id: "erizo-2".into(),
            sender_ip: "127.0.0.1".into(),
            sender_port,
            recver_erizo_id: "erizo-1".into(),
            recver_ip: "127.0.0.1".into(),
            recver_port: 0,
            src_stream_id: stream_id.to_string(),
            label: "cam".into(),
            subscribe_count: 1,
        }),
    }
}

/// Mixer `id` with one layer per stream
/// Open a connection on a fake session; a publisher unless `subscription` is set
pub fn open_connection(
    sessions: &FakeSessionFactory,
    pool: &WorkerPool,
    client_id: &str,
    stream_id: &str,
    subscription: Option<SubscriptionSource>,
) -> Arc<Connection> {
    let context = ConnectionContext {
        node: NodeContext::new("agent-1", "erizo-1"),
        appid: 1,
        room_id: "r1".into(),
        client_id: client_id.into(),
        stream_id: stream_id.into(),
        label: "cam".into(),
        reply_to: String::new(),
        is_publisher: subscription.is_none(),
    };
    let bus: Arc<dyn MessageBus> = Arc::new(ChannelBus::new());
    Connection::open(context, subscription, sessions, bus, pool.lease()).unwrap()
}

pub fn mixer_config(id: &str, stream_ids: &[&str]) -> MixerConfig {
    MixerConfig {
        appid: 1,
        id: id.to_string(),
        room_id: "r1".into(),
        erizo_id: "erizo-1".into(),
        agent_id: "agent-1".into(),
        agent_ip: "127.0.0.1".into(),
        org_client_id: "c1".into(),
        client_id: format!("cli_mixer_{}", id),
        bridge_ip: "127.0.0.1".into(),
        bridge_port: 0,
        video_ssrc: 0xC0C0,
        audio_ssrc: 0xD0D0,
        width: 1280,
        height: 720,
        bitrate: 1_500_000,
        layers: stream_ids
            .iter()
            .enumerate()
            .map(|(i, stream_id)| layer(stream_id, 6000 + i as u16))
            .collect(),
        reply_to: String::new(),
    }
}

/// An orchestrator wired to fakes and a loopback bridge
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub sessions: Arc<FakeSessionFactory>,
    pub recorders: Arc<FakeRecorderFactory>,
    pub mixers: Arc<FakeMixerFactory>,
    pub bus: Arc<ChannelBus>,
    pub io: Arc<BridgeIo>,
    workers: Arc<WorkerPool>,
    io_workers: Arc<WorkerPool>,
}

impl Harness {
    pub async fn start() -> Self {
        let config = RelayConfig::default()
            .bridge(
                BridgeConfig::with_addr("127.0.0.1:0".parse().unwrap())
                    .socket_count(1)
                    .socket_buffer_size(0)
                    .poll_interval(Duration::from_millis(20)),
            )
            .worker_threads(2)
            .io_worker_threads(2)
            .exit_poll_interval(Duration::from_millis(50))
            .record_path("/tmp/relay-record");

        let io = BridgeIo::bind(config.bridge.clone()).await.unwrap();
        let workers = Arc::new(WorkerPool::start("workers", config.worker_threads));
        let io_workers = Arc::new(WorkerPool::start("io", config.io_worker_threads));
        let sessions = FakeSessionFactory::new();
        let recorders = FakeRecorderFactory::new();
        let mixers = FakeMixerFactory::new();
        let bus = Arc::new(ChannelBus::new());

        let orchestrator = Orchestrator::new(
            NodeContext::new("agent-1", "erizo-1"),
            &config,
            io.clone(),
            workers.clone(),
            io_workers.clone(),
            Collaborators {
                sessions: sessions.clone(),
                recorders: recorders.clone(),
                mixers: mixers.clone(),
                bus: bus.clone(),
            },
        );

        Self {
            orchestrator,
            sessions,
            recorders,
            mixers,
            bus,
            io,
            workers,
            io_workers,
        }
    }

    /// Deliver a control message with `data` string-encoded, as on the wire
    pub fn send(&self, method: &str, data: Value) {
        let message = json!({"method": method, "data": data.to_string()});
        self.orchestrator.handle_message(&message.to_string());
    }

    pub fn bus_subscribe(&self, destination: &str) -> mpsc::UnboundedReceiver<String> {
        self.bus.subscribe(destination).unwrap()
    }

    pub fn publisher(&self, client_id: &str, stream_id: &str) -> Value {
        json!({
            "appid": 1, "room_id": "r1", "client_id": client_id, "stream_id": stream_id,
            "label": "cam", "reply_to": "q1"
        })
    }

    pub fn subscriber(&self, client_id: &str, subscribe_to: &str, bridge_id: &str) -> Value {
        json!({
            "appid": 1, "room_id": "r1", "id": format!("{}_{}", client_id, subscribe_to),
            "client_id": client_id, "is_bridge": !bridge_id.is_empty(), "bridge_id": bridge_id,
            "subscribe_to": subscribe_to, "label": "cam", "reply_to": "q1"
        })
    }

    pub fn virtual_publisher(&self, bridge_id: &str, src_stream_id: &str) -> Value {
        json!({
            "appid": 1, "id": bridge_id, "srcStreamId": src_stream_id,
            "senderIp": "127.0.0.1", "senderPort": 9, "videoSSRC": 0, "audioSSRC": 0
        })
    }

    pub fn virtual_subscriber(&self, bridge_id: &str, src_stream_id: &str) -> Value {
        json!({
            "appid": 1, "id": bridge_id, "srcStreamId": src_stream_id,
            "recverIp": "127.0.0.1", "recverPort": 9
        })
    }

    pub async fn close(self) {
        self.orchestrator.close();
        self.io.close().await;
        self.workers.close().await;
        self.io_workers.close().await;
    }
}
