//! Connection state machine
//!
//! Tracks a local WebRTC connection from creation to teardown, driven by
//! the events its session reports.

use std::time::{Duration, Instant};

use crate::external::SessionEventKind;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Session created, not yet initialized
    Created,
    /// ICE/SDP machinery running
    Started,
    /// Remote SDP applied, answer produced
    Negotiated,
    /// Media flowing
    Ready,
    /// Negotiation or transport failed
    Failed,
    /// Torn down
    Closed,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Created => "created",
            ConnectionPhase::Started => "started",
            ConnectionPhase::Negotiated => "negotiated",
            ConnectionPhase::Ready => "ready",
            ConnectionPhase::Failed => "failed",
            ConnectionPhase::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub created_at: Instant,
    pub ready_at: Option<Instant>,
    /// Number of SDP negotiations completed
    pub negotiations: u32,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Created,
            created_at: Instant::now(),
            ready_at: None,
            negotiations: 0,
        }
    }

    /// Apply a session event; returns false when the event is ignored
    pub fn on_event(&mut self, kind: SessionEventKind) -> bool {
        if self.phase == ConnectionPhase::Closed {
            return false;
        }

        match kind {
            SessionEventKind::Initial => {
                if self.phase != ConnectionPhase::Created {
                    return false;
                }
                self.phase = ConnectionPhase::Started;
            }
            SessionEventKind::SdpProcessed => {
                self.negotiations += 1;
                // Renegotiation keeps a ready connection ready
                if self.phase != ConnectionPhase::Ready {
                    self.phase = ConnectionPhase::Negotiated;
                }
            }
            SessionEventKind::Ready => {
                if self.ready_at.is_none() {
                    self.ready_at = Some(Instant::now());
                }
                self.phase = ConnectionPhase::Ready;
            }
            SessionEventKind::Failed => {
                self.phase = ConnectionPhase::Failed;
            }
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ConnectionPhase::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    /// Time from creation to first `Ready`
    pub fn setup_time(&self) -> Option<Duration> {
        self.ready_at.map(|at| at.duration_since(self.created_at))
    }

    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Mark closed; returns false if already closed
    pub fn close(&mut self) -> bool {
        if self.phase == ConnectionPhase::Closed {
            return false;
        }
        self.phase = ConnectionPhase::Closed;
        true
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
