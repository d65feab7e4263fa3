//! Bridge connection: a `BridgeMediaStream` registered on the process
//! transport, plus the fan-out a receive-mode bridge re-broadcasts through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::bridge::{BridgeIo, BridgeMediaStream, BridgeMode, BridgeStreamOptions, BridgeTransport};
use crate::error::Result;
use crate::media::{subscriber_id, FanOutProcessor, MediaSink, MediaSource};
use crate::stats::BridgeStreamSnapshot;
use crate::worker::WorkerLease;

pub struct BridgeConn {
    id: String,
    src_stream_id: String,
    stream: Arc<BridgeMediaStream>,
    fanout: Option<Arc<FanOutProcessor>>,
    io: Weak<BridgeIo>,
    pinned: AtomicBool,
    closed: AtomicBool,
}

impl BridgeConn {
    /// Build the stream, wire its fan-out and register it on `io`
    pub fn open(
        options: BridgeStreamOptions,
        src_stream_id: impl Into<String>,
        io: &Arc<BridgeIo>,
        worker: Option<WorkerLease>,
    ) -> Result<Arc<Self>> {
        let transport: Weak<dyn BridgeTransport> = Arc::downgrade(io) as Weak<dyn BridgeTransport>;
        let stream = BridgeMediaStream::new(options, transport, worker)?;

        let fanout = match stream.mode() {
            BridgeMode::Receive => {
                let fanout = FanOutProcessor::new();
                let source: Arc<dyn MediaSource> = stream.clone();
                fanout.set_publisher(&source)?;
                stream.set_media_sink(Some(fanout.clone()));
                Some(fanout)
            }
            BridgeMode::Send => None,
        };

        if let Some(previous) = io.add_stream(stream.clone()) {
            tracing::warn!(bridge_id = %stream.name(), "Replaced bridge stream with the same id");
            previous.close();
        }

        let conn = Arc::new(Self {
            id: stream.name().to_string(),
            src_stream_id: src_stream_id.into(),
            stream,
            fanout,
            io: Arc::downgrade(io),
            pinned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        tracing::info!(
            bridge_id = %conn.id,
            src_stream_id = %conn.src_stream_id,
            mode = %conn.mode(),
            remote = %conn.stream.remote(),
            "Bridge connection opened"
        );
        Ok(conn)
    }

    /// Bridge stream id, also the key in the bridge table
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream this bridge carries
    pub fn src_stream_id(&self) -> &str {
        &self.src_stream_id
    }

    pub fn mode(&self) -> BridgeMode {
        self.stream.mode()
    }

    /// Underlying media stream registered on the transport
    pub fn stream(&self) -> &Arc<BridgeMediaStream> {
        &self.stream
    }

    /// Fan-out of a receive-mode bridge
    pub fn fanout(&self) -> Option<&Arc<FanOutProcessor>> {
        self.fanout.as_ref()
    }

    /// The stream as a sink for local media (send mode)
    pub fn sink(&self) -> Arc<dyn MediaSink> {
        self.stream.clone()
    }

    /// Counters of the underlying stream
    pub fn stats(&self) -> BridgeStreamSnapshot {
        self.stream.stats()
    }

    /// Keep the bridge open until it is removed explicitly
    ///
    /// Set by `addVirtualPublisher`. Unpinned bridges are closed once their
    /// last mixer layer leaves and nothing else is attached.
    pub fn pin(&self) {
        self.pinned.store(true, Ordering::Release);
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// Nothing keeps this bridge open: not pinned, no sink on its fan-out
    pub fn is_unused(&self) -> bool {
        !self.is_pinned()
            && self
                .fanout
                .as_ref()
                .map_or(true, |fanout| fanout.subscriber_count() == 0)
    }

    /// Attach `sink` for `relying_id` under `<relying_id>_<bridge_id>`
    pub fn add_subscriber(&self, relying_id: &str, sink: Arc<dyn MediaSink>) -> bool {
        self.add_sink(subscriber_id(relying_id, &self.id), sink)
    }

    /// Detach the sink `add_subscriber` attached for `relying_id`
    pub fn remove_subscriber(&self, relying_id: &str) -> bool {
        self.remove_sink(&subscriber_id(relying_id, &self.id))
    }

    /// Attach `sink` under `id`; false for a send-mode bridge
    pub fn add_sink(&self, id: impl Into<String>, sink: Arc<dyn MediaSink>) -> bool {
        match &self.fanout {
            Some(fanout) => {
                fanout.add_subscriber(sink, id);
                true
            }
            None => false,
        }
    }

    /// True if a sink was attached under `id`
    pub fn remove_sink(&self, id: &str) -> bool {
        self.fanout
            .as_ref()
            .and_then(|fanout| fanout.remove_subscriber(id))
            .is_some()
    }

    pub fn has_sink(&self, id: &str) -> bool {
        self.fanout
            .as_ref()
            .is_some_and(|fanout| fanout.has_subscriber(id))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deregister from the transport, then close the fan-out and stream
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(io) = self.io.upgrade() {
            // Only drop the entry if it is still ours
            if let Some(current) = io.get_stream(self.stream.stream_id()) {
                if Arc::ptr_eq(&current, &self.stream) {
                    io.remove_stream(self.stream.stream_id());
                }
            }
        }
        self.stream.set_media_sink(None);
        if let Some(fanout) = &self.fanout {
            fanout.close();
        }
        self.stream.close();

        tracing::info!(bridge_id = %self.id, mode = %self.mode(), "Bridge connection closed");
    }
}

impl std::fmt::Debug for BridgeConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConn")
            .field("id", &self.id)
            .field("src_stream_id", &self.src_stream_id)
            .field("mode", &self.mode())
            .finish()
    }
}
