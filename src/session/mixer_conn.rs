//! Mixer connection
//!
//! Wraps an external mixer together with the fan-out its composited output
//! is relayed through, and tracks the layers currently wired into it.
//!
//! ```text
//!  bridge "b1" fan-out ──► layer_sink("s1") ──┐
//!  bridge "b2" fan-out ──► layer_sink("s2") ──┤ Mixer ──► output fan-out ──► subscribers
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::control::{Layer, LayerRef, MixerConfig};
use crate::error::Result;
use crate::external::{Mixer, MixerFactory};
use crate::media::{subscriber_id, FanOutProcessor, MediaSink, MediaSource};

pub struct MixerConn {
    config: MixerConfig,
    mixer: Arc<dyn Mixer>,
    source: Arc<dyn MediaSource>,
    output: Arc<FanOutProcessor>,
    layers: Mutex<Vec<Layer>>,
    closed: AtomicBool,
}

impl MixerConn {
    /// Create the mixer, wire its output fan-out and start it
    pub fn open(config: &MixerConfig, factory: &dyn MixerFactory) -> Result<Arc<Self>> {
        let mixer = factory.create(config)?;
        let source = mixer.clone().as_source();
        let output = FanOutProcessor::new();
        output.set_publisher(&source)?;
        source.set_media_sink(Some(output.clone()));

        let conn = Arc::new(Self {
            config: config.clone(),
            mixer,
            source,
            output,
            layers: Mutex::new(config.layers.clone()),
            closed: AtomicBool::new(false),
        });

        if let Err(e) = conn.mixer.init(config) {
            conn.close();
            return Err(e);
        }

        tracing::info!(
            mixer_id = %config.id,
            layers = config.layers.len(),
            width = config.width,
            height = config.height,
            "Mixer opened"
        );
        Ok(conn)
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Configuration the mixer was opened with
    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn mixer(&self) -> &Arc<dyn Mixer> {
        &self.mixer
    }

    pub fn output(&self) -> &Arc<FanOutProcessor> {
        &self.output
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.layers.lock().clone()
    }

    /// How many tracked layers take input from `stream_id`
    pub fn stream_use_count(&self, stream_id: &str) -> usize {
        self.layers
            .lock()
            .iter()
            .filter(|layer| layer.stream_id == stream_id)
            .count()
    }

    /// Input sink for one source stream
    pub fn layer_sink(&self, stream_id: &str) -> Arc<dyn MediaSink> {
        self.mixer.clone().layer_sink(stream_id)
    }

    /// Add a layer; a layer already occupying the same slot is kept
    pub fn add_layer(&self, layer: &Layer) -> Result<bool> {
        let slot = layer.slot();
        if self.layers.lock().iter().any(|l| l.same_slot(&slot)) {
            return Ok(false);
        }
        self.mixer.add_mixer_layer(layer)?;
        self.layers.lock().push(layer.clone());
        Ok(true)
    }

    /// Remove the layer in `slot`, returning it
    pub fn remove_layer(&self, slot: &LayerRef) -> Result<Option<Layer>> {
        let removed = {
            let mut layers = self.layers.lock();
            let position = layers.iter().position(|l| l.same_slot(slot));
            position.map(|index| layers.remove(index))
        };
        if removed.is_some() {
            self.mixer.remove_mixer_layer(slot)?;
        }
        Ok(removed)
    }

    /// Attach `sink` for `relying_id` under `<relying_id>_<mixer_id>`
    pub fn add_subscriber(&self, relying_id: &str, sink: Arc<dyn MediaSink>) {
        self.output
            .add_subscriber(sink, subscriber_id(relying_id, &self.config.id));
    }

    pub fn remove_subscriber(&self, relying_id: &str) -> bool {
        self.output
            .remove_subscriber(&subscriber_id(relying_id, &self.config.id))
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detach the output, close its fan-out, then stop the mixer
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.source.set_media_sink(None);
        self.output.close();
        self.mixer.close();
        tracing::info!(mixer_id = %self.config.id, "Mixer closed");
    }
}

impl std::fmt::Debug for MixerConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerConn")
            .field("id", &self.config.id)
            .field("layers", &self.layers.lock().len())
            .finish()
    }
}
