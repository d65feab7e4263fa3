//! WebRTC session contract
//!
//! ICE, DTLS, SRTP and SDP handling live outside the relay. The relay only
//! needs to create a session, feed it signalling, wire it into the fan-out
//! graph and hear about its lifecycle.

use std::sync::{Arc, OnceLock, Weak};

use crate::error::Result;
use crate::media::{MediaSink, MediaSource};
use crate::worker::Worker;

/// Lifecycle events reported by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// ICE/SDP machinery created
    Initial,
    /// Remote SDP applied; the message carries the local answer
    SdpProcessed,
    /// Media is flowing
    Ready,
    /// Negotiation or transport failed
    Failed,
}

/// One event from a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub message: String,
}

/// Receiver of session events
pub trait SessionEventHandler: Send + Sync {
    fn on_session_event(&self, event: SessionEvent);
}

/// Handle a session uses to report events to its owner
///
/// Events are queued onto the owner's worker, never run on the caller's
/// thread, so sessions can report from their own I/O threads.
#[derive(Clone)]
pub struct SessionEvents {
    worker: Option<Arc<Worker>>,
    handler: Arc<OnceLock<Weak<dyn SessionEventHandler>>>,
}

impl SessionEvents {
    pub fn new(worker: Option<Arc<Worker>>) -> Self {
        Self {
            worker,
            handler: Arc::new(OnceLock::new()),
        }
    }

    /// Attach the owner; only the first call takes effect
    pub fn bind(&self, handler: Weak<dyn SessionEventHandler>) {
        let _ = self.handler.set(handler);
    }

    /// Report an event; returns false when there is nobody to receive it
    pub fn notify(&self, kind: SessionEventKind, message: impl Into<String>) -> bool {
        let Some(handler) = self.handler.get().cloned() else {
            return false;
        };
        let event = SessionEvent {
            kind,
            message: message.into(),
        };

        match &self.worker {
            Some(worker) => worker.task(move || {
                if let Some(handler) = handler.upgrade() {
                    handler.on_session_event(event);
                }
            }),
            None => match handler.upgrade() {
                Some(handler) => {
                    handler.on_session_event(event);
                    true
                }
                None => false,
            },
        }
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("bound", &self.handler.get().is_some())
            .finish()
    }
}

/// What a session is created for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub client_id: String,
    pub stream_id: String,
    pub label: String,
    pub is_publisher: bool,
}

/// A negotiated peer connection plus its media stream
pub trait WebRtcSession: Send + Sync {
    /// Start ICE gathering and media setup
    fn init(&self) -> Result<()>;

    fn set_remote_sdp(&self, sdp: &str) -> Result<()>;

    fn add_remote_candidate(&self, mid: &str, mline_index: i32, candidate: &str) -> Result<()>;

    /// Remote (video, audio) SSRCs once known; zero when not negotiated
    fn remote_ssrcs(&self) -> (u32, u32) {
        (0, 0)
    }

    fn close(&self);

    /// The session as a receiver of relayed media (subscriber role)
    fn as_sink(self: Arc<Self>) -> Arc<dyn MediaSink>;

    /// The session as a producer of media (publisher role)
    fn as_source(self: Arc<Self>) -> Arc<dyn MediaSource>;
}

/// Creates sessions for new connections
pub trait WebRtcSessionFactory: Send + Sync {
    fn create(&self, params: &SessionParams, events: SessionEvents)
        -> Result<Arc<dyn WebRtcSession>>;
}
