//! Local WebRTC connection
//!
//! A `Connection` owns one WebRTC session for one client and one stream.
//! Publishers additionally own the fan-out processor their media is
//! relayed through:
//!
//! ```text
//!  publisher session ──► FanOutProcessor ──► subscriber "c2_s1" (session sink)
//!          ▲                    │        ──► subscriber "b1_s1" (bridge stream)
//!          └──── feedback ──────┘
//! ```
//!
//! Session events are queued onto the connection's worker and turned into
//! outbound bus events there.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ConnectionContext;
use super::event::RelayEvent;
use super::state::{ConnectionPhase, ConnectionState};
use crate::error::{Error, Result};
use crate::external::{
    MessageBus, SessionEvent, SessionEventHandler, SessionEventKind, SessionEvents, WebRtcSession,
    WebRtcSessionFactory,
};
use crate::media::{subscriber_id, FanOutProcessor, MediaSink, MediaSource};
use crate::worker::WorkerLease;

/// What a subscriber connection is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionSource {
    /// A local publisher, by stream id
    Publisher(String),
    /// A mixer output, by mixer id
    Mixer(String),
    /// A bridge fan-out, by bridge id
    Bridge(String),
}

pub struct Connection {
    context: ConnectionContext,
    session: Arc<dyn WebRtcSession>,
    source: Option<Arc<dyn MediaSource>>,
    sink: Option<Arc<dyn MediaSink>>,
    fanout: Option<Arc<FanOutProcessor>>,
    subscription: Option<SubscriptionSource>,
    state: Mutex<ConnectionState>,
    bus: Arc<dyn MessageBus>,
    worker: WorkerLease,
}

impl Connection {
    /// Create and initialize the session for `context`
    ///
    /// The connection is fully wired before `init` runs, so events raised
    /// during initialization are not lost.
    pub fn open(
        context: ConnectionContext,
        subscription: Option<SubscriptionSource>,
        sessions: &dyn WebRtcSessionFactory,
        bus: Arc<dyn MessageBus>,
        worker: WorkerLease,
    ) -> Result<Arc<Self>> {
        let events = SessionEvents::new(Some(worker.worker().clone()));
        let session = sessions.create(&context.session_params(), events.clone())?;

        let (source, sink, fanout) = if context.is_publisher {
            let source = session.clone().as_source();
            let fanout = FanOutProcessor::new();
            fanout.set_publisher(&source)?;
            source.set_media_sink(Some(fanout.clone()));
            (Some(source), None, Some(fanout))
        } else {
            (None, Some(session.clone().as_sink()), None)
        };

        let connection = Arc::new(Self {
            context,
            session,
            source,
            sink,
            fanout,
            subscription,
            state: Mutex::new(ConnectionState::new()),
            bus,
            worker,
        });

        let handler: Weak<dyn SessionEventHandler> =
            Arc::downgrade(&connection) as Weak<dyn SessionEventHandler>;
        events.bind(handler);

        if let Err(e) = connection.session.init() {
            connection.close();
            return Err(e);
        }

        tracing::info!(
            client_id = %connection.context.client_id,
            stream_id = %connection.context.stream_id,
            publisher = connection.context.is_publisher,
            worker = connection.worker.worker().id(),
            "Connection opened"
        );
        Ok(connection)
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn client_id(&self) -> &str {
        &self.context.client_id
    }

    pub fn stream_id(&self) -> &str {
        &self.context.stream_id
    }

    pub fn is_publisher(&self) -> bool {
        self.context.is_publisher
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.lock().phase
    }

    pub fn subscription(&self) -> Option<&SubscriptionSource> {
        self.subscription.as_ref()
    }

    /// Fan-out processor of a publisher connection
    pub fn fanout(&self) -> Option<&Arc<FanOutProcessor>> {
        self.fanout.as_ref()
    }

    /// The session as a media sink (subscriber connections only)
    pub fn sink(&self) -> Option<Arc<dyn MediaSink>> {
        self.sink.clone()
    }

    /// Attach `sink` for `relying_id` under `<relying_id>_<stream_id>`
    pub fn add_subscriber(&self, relying_id: &str, sink: Arc<dyn MediaSink>) -> bool {
        self.add_sink(subscriber_id(relying_id, &self.context.stream_id), sink)
    }

    pub fn remove_subscriber(&self, relying_id: &str) -> bool {
        self.remove_sink(&subscriber_id(relying_id, &self.context.stream_id))
    }

    /// Attach `sink` under a caller-chosen id
    pub fn add_sink(&self, id: impl Into<String>, sink: Arc<dyn MediaSink>) -> bool {
        match &self.fanout {
            Some(fanout) => {
                fanout.add_subscriber(sink, id);
                true
            }
            None => false,
        }
    }

    pub fn remove_sink(&self, id: &str) -> bool {
        self.fanout
            .as_ref()
            .and_then(|fanout| fanout.remove_subscriber(id))
            .is_some()
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.fanout
            .as_ref()
            .map(|fanout| fanout.subscriber_ids())
            .unwrap_or_default()
    }

    pub fn set_remote_sdp(&self, sdp: &str) -> Result<()> {
        if self.state.lock().is_closed() {
            return Err(Error::Closed("connection"));
        }
        self.session.set_remote_sdp(sdp)
    }

    pub fn add_remote_candidate(&self, mid: &str, mline_index: i32, candidate: &str) -> Result<()> {
        if self.state.lock().is_closed() {
            return Err(Error::Closed("connection"));
        }
        self.session.add_remote_candidate(mid, mline_index, candidate)
    }

    /// Detach media, close the fan-out, then the session
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        if !self.state.lock().close() {
            return;
        }

        if let Some(source) = &self.source {
            source.set_media_sink(None);
        }
        if let Some(fanout) = &self.fanout {
            fanout.close();
        }
        self.session.close();

        tracing::info!(
            client_id = %self.context.client_id,
            stream_id = %self.context.stream_id,
            publisher = self.context.is_publisher,
            "Connection closed"
        );
    }

    fn publish(&self, event: &RelayEvent) {
        if self.context.reply_to.is_empty() {
            return;
        }
        let published = event
            .to_json()
            .and_then(|message| self.bus.publish(&self.context.reply_to, message));
        if let Err(e) = published {
            tracing::warn!(
                client_id = %self.context.client_id,
                stream_id = %self.context.stream_id,
                reply_to = %self.context.reply_to,
                error = %e,
                "Failed to publish connection event"
            );
        }
    }
}

impl SessionEventHandler for Connection {
    fn on_session_event(&self, event: SessionEvent) {
        if !self.state.lock().on_event(event.kind) {
            tracing::debug!(
                stream_id = %self.context.stream_id,
                event = ?event.kind,
                "Session event ignored"
            );
            return;
        }

        if event.kind == SessionEventKind::Failed {
            tracing::error!(
                client_id = %self.context.client_id,
                stream_id = %self.context.stream_id,
                message = %event.message,
                "Session failed"
            );
            return;
        }

        if let Some(relay_event) =
            RelayEvent::from_session(&self.context, &event, self.session.remote_ssrcs())
        {
            self.publish(&relay_event);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.context.client_id)
            .field("stream_id", &self.context.stream_id)
            .field("publisher", &self.context.is_publisher)
            .field("phase", &self.phase())
            .finish()
    }
}
