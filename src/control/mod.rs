//! Control plane messages
//!
//! Parsing and validation of the JSON commands the relay consumes from the
//! message bus. Nothing here touches relay state.

pub mod envelope;
pub mod mixer;
pub mod payload;

pub use envelope::{ControlRequest, Method};
pub use mixer::{BridgeStreamInfo, Layer, LayerRef, MixerConfig};
pub use payload::{
    AddMixerLayer, AddPublisher, AddRecorder, AddSubscriber, AddVirtualPublisher,
    AddVirtualSubscriber, Candidate, RemoveMixerLayer, RemovePublisher, RemoveRecorder,
    RemoveSubscriber, RemoveVirtualPublisher, RemoveVirtualSubscriber, SignalMessage, Signalling,
    Validate,
};
