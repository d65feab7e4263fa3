//! Stream mixer contract
//!
//! A mixer composites several relayed streams into one output. It consumes
//! one sink per input stream and produces a single source whose media the
//! relay fans out like any publisher.

use std::sync::Arc;

use crate::control::{Layer, LayerRef, MixerConfig};
use crate::error::Result;
use crate::media::{MediaSink, MediaSource};

pub trait Mixer: Send + Sync {
    /// Start mixing with the initial layout
    fn init(&self, config: &MixerConfig) -> Result<()>;

    fn add_mixer_layer(&self, layer: &Layer) -> Result<()>;

    fn remove_mixer_layer(&self, layer: &LayerRef) -> Result<()>;

    /// Current layout, including layers added since `init`
    fn mixer_config(&self) -> MixerConfig;

    fn close(&self);

    /// Input sink for media of `stream_id`
    fn layer_sink(self: Arc<Self>, stream_id: &str) -> Arc<dyn MediaSink>;

    /// The composited output
    fn as_source(self: Arc<Self>) -> Arc<dyn MediaSource>;
}

pub trait MixerFactory: Send + Sync {
    fn create(&self, config: &MixerConfig) -> Result<Arc<dyn Mixer>>;
}
