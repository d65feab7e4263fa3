//! Stand-alone relay node
//!
//! Run with: cargo run --example relay_node [AGENT_ID] [ERIZO_ID] [BRIDGE_IP] [BRIDGE_PORT]
//!
//! Examples:
//!   cargo run --example relay_node                                # agent-1 erizo-1 0.0.0.0:9000
//!   cargo run --example relay_node agent-2 erizo-2 127.0.0.1 9100
//!   RUST_LOG=relay_rs=debug cargo run --example relay_node
//!
//! The node listens for control messages on an in-process bus bound to its
//! erizo id. The WebRTC stack, recorder and mixer are stand-ins that log
//! what the relay asks of them, so the control flow and the bridge
//! transport can be exercised without a media engine:
//!
//! - sessions accept signalling and answer with a canned SDP
//! - recorders count the bytes they would have written
//! - the mixer forwards every layer unchanged to its output

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use relay_rs::control::{Layer, LayerRef, MixerConfig};
use relay_rs::external::{
    ChannelBus, Mixer, MixerFactory, Recorder, RecorderFactory, RecorderParams, SessionEventKind,
    SessionEvents, SessionParams, WebRtcSession, WebRtcSessionFactory,
};
use relay_rs::media::{sink::deliver, DataPacket, FeedbackSink, MediaSink, MediaSource};
use relay_rs::{Collaborators, NodeContext, RelayConfig, RelayNode, StopReason};
use tracing_subscriber::EnvFilter;

/// Session that logs signalling and never produces media
struct LoggingSession {
    params: SessionParams,
    events: SessionEvents,
    relayed: AtomicU64,
}

impl WebRtcSession for LoggingSession {
    fn init(&self) -> relay_rs::Result<()> {
        tracing::info!(client_id = %self.params.client_id, stream_id = %self.params.stream_id, "Session init");
        self.events.notify(SessionEventKind::Initial, "");
        Ok(())
    }

    fn set_remote_sdp(&self, sdp: &str) -> relay_rs::Result<()> {
        tracing::info!(stream_id = %self.params.stream_id, len = sdp.len(), "Remote SDP");
        self.events.notify(SessionEventKind::SdpProcessed, "v=0\r\ns=relay-demo\r\n");
        self.events.notify(SessionEventKind::Ready, "");
        Ok(())
    }

    fn add_remote_candidate(&self, mid: &str, mline_index: i32, candidate: &str) -> relay_rs::Result<()> {
        tracing::debug!(mid = %mid, mline_index, candidate = %candidate, "Remote candidate");
        Ok(())
    }

    fn close(&self) {
        tracing::info!(
            stream_id = %self.params.stream_id,
            relayed = self.relayed.load(Ordering::Relaxed),
            "Session closed"
        );
    }

    fn as_sink(self: Arc<Self>) -> Arc<dyn MediaSink> {
        self
    }

    fn as_source(self: Arc<Self>) -> Arc<dyn MediaSource> {
        self
    }
}

impl MediaSink for LoggingSession {
    fn deliver_audio(&self, _packet: DataPacket) -> relay_rs::Result<()> {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn deliver_video(&self, _packet: DataPacket) -> relay_rs::Result<()> {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl MediaSource for LoggingSession {
    fn set_media_sink(&self, _sink: Option<Arc<dyn MediaSink>>) {}

    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        None
    }
}

struct LoggingSessionFactory;

impl WebRtcSessionFactory for LoggingSessionFactory {
    fn create(
        &self,
        params: &SessionParams,
        events: SessionEvents,
    ) -> relay_rs::Result<Arc<dyn WebRtcSession>> {
        Ok(Arc::new(LoggingSession {
            params: params.clone(),
            events,
            relayed: AtomicU64::new(0),
        }))
    }
}

/// Recorder that only counts what it receives
struct CountingRecorder {
    params: RecorderParams,
    bytes: AtomicU64,
}

impl Recorder for CountingRecorder {
    fn init(&self) -> relay_rs::Result<()> {
        for file in &self.params.files {
            tracing::info!(file = %file.display(), "Would record to");
        }
        Ok(())
    }

    fn close(&self) {
        tracing::info!(
            stream_id = %self.params.stream_id,
            bytes = self.bytes.load(Ordering::Relaxed),
            "Recorder closed"
        );
    }

    fn as_sink(self: Arc<Self>) -> Arc<dyn MediaSink> {
        self
    }
}

impl MediaSink for CountingRecorder {
    fn deliver_audio(&self, packet: DataPacket) -> relay_rs::Result<()> {
        self.bytes.fetch_add(packet.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn deliver_video(&self, packet: DataPacket) -> relay_rs::Result<()> {
        self.bytes.fetch_add(packet.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

struct CountingRecorderFactory;

impl RecorderFactory for CountingRecorderFactory {
    fn create(&self, params: &RecorderParams) -> relay_rs::Result<Arc<dyn Recorder>> {
        Ok(Arc::new(CountingRecorder {
            params: params.clone(),
            bytes: AtomicU64::new(0),
        }))
    }
}

/// Mixer that forwards every layer straight to its output
struct PassthroughMixer {
    config: Mutex<MixerConfig>,
    output: Arc<Mutex<Option<Arc<dyn MediaSink>>>>,
}

struct LayerInput {
    output: Weak<Mutex<Option<Arc<dyn MediaSink>>>>,
}

impl LayerInput {
    fn forward(&self, packet: DataPacket) -> relay_rs::Result<()> {
        let sink = self.output.upgrade().and_then(|output| output.lock().clone());
        match sink {
            Some(sink) => deliver(sink.as_ref(), packet),
            None => Ok(()),
        }
    }
}

impl MediaSink for LayerInput {
    fn deliver_audio(&self, packet: DataPacket) -> relay_rs::Result<()> {
        self.forward(packet)
    }

    fn deliver_video(&self, packet: DataPacket) -> relay_rs::Result<()> {
        self.forward(packet)
    }
}

impl Mixer for PassthroughMixer {
    fn init(&self, config: &MixerConfig) -> relay_rs::Result<()> {
        tracing::info!(mixer_id = %config.id, layers = config.layers.len(), "Mixer init");
        Ok(())
    }

    fn add_mixer_layer(&self, layer: &Layer) -> relay_rs::Result<()> {
        self.config.lock().layers.push(layer.clone());
        Ok(())
    }

    fn remove_mixer_layer(&self, layer: &LayerRef) -> relay_rs::Result<()> {
        self.config
            .lock()
            .layers
            .retain(|l| l.stream_id != layer.stream_id);
        Ok(())
    }

    fn mixer_config(&self) -> MixerConfig {
        self.config.lock().clone()
    }

    fn close(&self) {
        *self.output.lock() = None;
    }

    fn layer_sink(self: Arc<Self>, _stream_id: &str) -> Arc<dyn MediaSink> {
        Arc::new(LayerInput {
            output: Arc::downgrade(&self.output),
        })
    }

    fn as_source(self: Arc<Self>) -> Arc<dyn MediaSource> {
        self
    }
}

impl MediaSource for PassthroughMixer {
    fn set_media_sink(&self, sink: Option<Arc<dyn MediaSink>>) {
        *self.output.lock() = sink;
    }

    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        None
    }
}

struct PassthroughMixerFactory;

impl MixerFactory for PassthroughMixerFactory {
    fn create(&self, config: &MixerConfig) -> relay_rs::Result<Arc<dyn Mixer>> {
        Ok(Arc::new(PassthroughMixer {
            config: Mutex::new(config.clone()),
            output: Arc::new(Mutex::new(None)),
        }))
    }
}

fn parse_args() -> Result<(NodeContext, SocketAddr), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let arg = |index: usize, default: &str| args.get(index).cloned().unwrap_or_else(|| default.to_string());

    let ip: IpAddr = arg(2, "0.0.0.0")
        .parse()
        .map_err(|e| format!("bad bridge ip: {}", e))?;
    let port: u16 = arg(3, "9000")
        .parse()
        .map_err(|e| format!("bad bridge port: {}", e))?;

    Ok((
        NodeContext::new(arg(0, "agent-1"), arg(1, "erizo-1")),
        SocketAddr::new(ip, port),
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_rs=info")),
        )
        .init();

    let (node_context, bridge_addr) = parse_args()?;
    let erizo_id = node_context.erizo_id.clone();

    let bus = Arc::new(ChannelBus::new());
    let collaborators = Collaborators {
        sessions: Arc::new(LoggingSessionFactory),
        recorders: Arc::new(CountingRecorderFactory),
        mixers: Arc::new(PassthroughMixerFactory),
        bus: bus.clone(),
    };

    let config = RelayConfig::with_bridge_addr(bridge_addr).record_path("/tmp/relay-record");
    let mut node = RelayNode::start(config, node_context, collaborators).await?;

    println!("Relay node {} bridge on {}", erizo_id, node.bridge_addr());
    println!("Press Ctrl+C to stop");

    let reason = node
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    println!(
        "Stopping ({:?}), clients={} bridges={}",
        reason,
        node.orchestrator().clients().len(),
        node.orchestrator().bridges().len(),
    );
    if reason == StopReason::Exit {
        println!("Last client left");
    }

    node.close().await;
    Ok(())
}
