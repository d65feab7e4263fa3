//! Mixers and their layers
//!
//! Each layer names the bridge its stream arrives on. The bridge is opened
//! in receive mode when missing, and the mixer's input for that stream is
//! attached to it as subscriber `mixer_<mixer_id>_<src_stream_id>`. A
//! bridge is shared with other mixers, local subscribers and recorders, so
//! detaching a layer closes it only once nothing else uses it.

use std::sync::Arc;

use super::Orchestrator;
use crate::bridge::BridgeMode;
use crate::control::{AddMixerLayer, Layer, MixerConfig, RemoveMixerLayer};
use crate::error::{Error, Result};
use crate::session::{MixerConn, RelayEvent, SubscriptionSource};

fn mixer_client_id(mixer_id: &str) -> String {
    format!("cli_mixer_{}", mixer_id)
}

fn mixer_relying_id(mixer_id: &str, src_stream_id: &str) -> String {
    format!("mixer_{}_{}", mixer_id, src_stream_id)
}

impl Orchestrator {
    pub fn add_mixer(&self, config: &MixerConfig) -> Result<()> {
        if self.clients.find_mixer(&config.id).is_some() {
            tracing::warn!(mixer_id = %config.id, "Mixer already present, ignoring");
            return Ok(());
        }

        let mixer = MixerConn::open(config, self.collaborators.mixers.as_ref())?;
        for (index, layer) in config.layers.iter().enumerate() {
            if let Err(e) = self.attach_layer(&mixer, layer) {
                for attached in &config.layers[..index] {
                    self.detach_layer(&config.id, attached);
                }
                mixer.close();
                return Err(e);
            }
        }

        let client_id = mixer_client_id(&config.id);
        self.clients.with_client_or_create(&client_id, |client| {
            client.mixers.insert(config.id.clone(), mixer);
        });

        tracing::info!(
            mixer_id = %config.id,
            client_id = %client_id,
            layers = config.layers.len(),
            "Mixer added"
        );
        self.publish(&config.reply_to, &RelayEvent::mixer_ready(config));
        Ok(())
    }

    pub fn add_mixer_layer(&self, payload: &AddMixerLayer) -> Result<()> {
        let Some(mixer) = self.mixer(payload.mixer_id()) else {
            tracing::warn!(mixer_id = %payload.mixer_id(), "Layer for unknown mixer");
            return Ok(());
        };

        let layer = payload.layer();
        if !mixer.add_layer(layer)? {
            tracing::debug!(
                mixer_id = %mixer.id(),
                stream_id = %layer.stream_id,
                index = layer.index,
                "Layer slot already taken"
            );
            return Ok(());
        }
        if let Err(e) = self.attach_layer(&mixer, layer) {
            if let Err(undo) = mixer.remove_layer(&layer.slot()) {
                tracing::warn!(mixer_id = %mixer.id(), error = %undo, "Failed to undo layer");
            }
            return Err(e);
        }

        tracing::info!(
            mixer_id = %mixer.id(),
            stream_id = %layer.stream_id,
            index = layer.index,
            "Mixer layer added"
        );
        Ok(())
    }

    /// Remove one layer; its bridge goes too when no other layer of the
    /// mixer uses the same stream
    pub fn remove_mixer_layer(&self, payload: &RemoveMixerLayer) -> Result<()> {
        let Some(mixer) = self.mixer(payload.mixer_id()) else {
            tracing::warn!(mixer_id = %payload.mixer_id(), "Layer removal for unknown mixer");
            return Ok(());
        };

        let slot = payload.layer();
        let Some(layer) = mixer.layers().into_iter().find(|l| l.same_slot(slot)) else {
            tracing::warn!(
                mixer_id = %mixer.id(),
                stream_id = %slot.stream_id,
                index = slot.index,
                "Unknown mixer layer"
            );
            return Ok(());
        };

        if mixer.stream_use_count(&slot.stream_id) <= 1 {
            self.detach_layer(mixer.id(), &layer);
        }
        mixer.remove_layer(slot)?;

        tracing::info!(
            mixer_id = %mixer.id(),
            stream_id = %slot.stream_id,
            index = slot.index,
            "Mixer layer removed"
        );
        Ok(())
    }

    /// Tear down a mixer, its layer bridges and everything fed by its output
    pub fn remove_mixer(&self, config: &MixerConfig) -> Result<()> {
        let client_id = mixer_client_id(&config.id);
        let removed = self
            .clients
            .with_client(&client_id, |client| client.mixers.remove(&config.id))
            .flatten();

        match removed {
            Some(mixer) => {
                let mixer_id = config.id.as_str();
                for layer in mixer.layers() {
                    self.detach_layer(mixer_id, &layer);
                }

                let subscribers = self.clients.take_subscribers(|connection| {
                    matches!(
                        connection.subscription(),
                        Some(SubscriptionSource::Mixer(id)) if id == mixer_id
                    )
                });
                let relays = self
                    .bridges
                    .remove_where(|bridge| {
                        bridge.mode() == BridgeMode::Send && bridge.src_stream_id() == mixer_id
                    });

                tracing::info!(
                    mixer_id = %mixer_id,
                    subscribers = subscribers.len(),
                    relays = relays.len(),
                    "Mixer removed"
                );

                for connection in subscribers {
                    connection.close();
                }
                self.retire_bridges(relays);
                mixer.close();
                self.clients.remove_empty();
            }
            None => {
                tracing::warn!(mixer_id = %config.id, client_id = %client_id, "Unknown mixer");
            }
        }

        self.check_exit();
        Ok(())
    }

    fn mixer(&self, mixer_id: &str) -> Option<Arc<MixerConn>> {
        self.clients
            .with_client(&mixer_client_id(mixer_id), |client| {
                client.mixers.get(mixer_id).cloned()
            })
            .flatten()
    }

    /// Open (or reuse) the layer's receive bridge and feed the mixer from it
    fn attach_layer(&self, mixer: &MixerConn, layer: &Layer) -> Result<()> {
        let info = layer
            .bridge_stream
            .as_ref()
            .ok_or_else(|| Error::invalid("layer has no bridge_stream"))?;
        let options = self
            .bridge_options(&info.id, &info.sender_ip, info.sender_port, BridgeMode::Receive)?
            .ssrcs(layer.audio_ssrc, layer.video_ssrc);

        let (bridge, created) = self
            .bridges
            .get_or_open(&info.id, || self.open_bridge(options, &info.src_stream_id))?;

        if !bridge.add_subscriber(
            &mixer_relying_id(mixer.id(), &info.src_stream_id),
            mixer.layer_sink(&layer.stream_id),
        ) {
            if created {
                if let Some(bridge) = self.bridges.remove(&info.id) {
                    bridge.close();
                }
            }
            return Err(Error::invalid(format!(
                "bridge {} cannot feed a mixer layer",
                info.id
            )));
        }

        tracing::debug!(
            mixer_id = %mixer.id(),
            bridge_id = %info.id,
            created = created,
            "Mixer layer attached"
        );
        Ok(())
    }

    /// Detach the mixer from the layer's bridge; close the bridge if
    /// nothing else is attached and no virtual publisher holds it
    fn detach_layer(&self, mixer_id: &str, layer: &Layer) {
        let Some(info) = &layer.bridge_stream else {
            return;
        };
        let Some(bridge) = self.bridges.get(&info.id) else {
            return;
        };
        bridge.remove_subscriber(&mixer_relying_id(mixer_id, &info.src_stream_id));

        if !self.release_bridge(&info.id) {
            tracing::debug!(
                mixer_id = %mixer_id,
                bridge_id = %info.id,
                "Bridge still in use, kept open"
            );
        }
    }
}
