//! Error types for the relay core

use std::net::SocketAddr;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the relay core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying socket or runtime I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind a bridge socket
    #[error("failed to bind bridge socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Control payload was not valid JSON or had the wrong shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Control payload parsed but failed validation
    #[error("invalid control message: {0}")]
    InvalidMessage(String),

    /// Control envelope named a method the relay does not handle
    #[error("unknown control method: {0}")]
    UnknownMethod(String),

    /// Bridge stream id does not fit the fixed-width header
    #[error("invalid bridge stream id {0:?}")]
    InvalidStreamId(String),

    /// Remote endpoint could not be parsed
    #[error("invalid address {0}")]
    InvalidAddress(String),

    /// A fan-out processor was given a second publisher
    #[error("fan-out processor already has a publisher")]
    PublisherAlreadyBound,

    /// Target has been closed and accepts no more work
    #[error("{0} is closed")]
    Closed(&'static str),

    /// WebRTC session reported a failure
    #[error("session error: {0}")]
    Session(String),

    /// Recorder, mixer or bus reported a failure
    #[error("{kind} error: {message}")]
    Collaborator { kind: &'static str, message: String },
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidMessage(message.into())
    }

    /// Build a collaborator failure
    pub fn collaborator(kind: &'static str, message: impl Into<String>) -> Self {
        Error::Collaborator {
            kind,
            message: message.into(),
        }
    }
}
