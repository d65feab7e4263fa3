//! Contracts for collaborators that live outside the relay
//!
//! WebRTC sessions, recorders, mixers and the message bus are supplied by
//! the embedding process through these traits.

pub mod bus;
pub mod mixer;
pub mod recorder;
pub mod webrtc;

pub use bus::{ChannelBus, MessageBus};
pub use mixer::{Mixer, MixerFactory};
pub use recorder::{record_file, Recorder, RecorderFactory, RecorderParams};
pub use webrtc::{
    SessionEvent, SessionEventHandler, SessionEventKind, SessionEvents, SessionParams,
    WebRtcSession, WebRtcSessionFactory,
};
