//! Mixer and layer descriptions carried by mixer control messages

use serde::{Deserialize, Serialize};

fn default_audio_gain() -> f64 {
    1.0
}

/// Bridge endpoint description embedded in a mixer layer
///
/// Describes where the layer's stream arrives from: the receive-mode bridge
/// keyed by `id` ingests it from `sender_ip:sender_port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeStreamInfo {
    pub id: String,
    pub room_id: String,
    pub sender_erizo_id: String,
    pub sender_ip: String,
    pub sender_port: u16,
    pub recver_erizo_id: String,
    pub recver_ip: String,
    pub recver_port: u16,
    pub src_stream_id: String,
    pub label: String,
    pub subscribe_count: i32,
}

/// One input of a mixer: a source stream and where it is composited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub stream_id: String,
    pub index: i32,
    pub width: i32,
    pub height: i32,
    #[serde(rename = "offset_x")]
    pub off_x: i32,
    #[serde(rename = "offset_y")]
    pub off_y: i32,
    /// 1.0 keeps the level, 0.0 mutes
    #[serde(default = "default_audio_gain")]
    pub audio_gain: f64,
    #[serde(default)]
    pub video_ssrc: u32,
    #[serde(default)]
    pub audio_ssrc: u32,
    #[serde(default)]
    pub bridge_stream: Option<BridgeStreamInfo>,
}

impl Layer {
    /// Two layers are the same slot when stream and index match
    pub fn same_slot(&self, other: &LayerRef) -> bool {
        self.stream_id == other.stream_id && self.index == other.index
    }

    pub fn slot(&self) -> LayerRef {
        LayerRef {
            stream_id: self.stream_id.clone(),
            index: self.index,
        }
    }
}

/// Identifies a layer for removal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRef {
    pub stream_id: String,
    pub index: i32,
}

/// Full mixer description, as carried by `addMixer` and `removeMixer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerConfig {
    pub appid: i64,
    pub id: String,
    pub room_id: String,
    pub erizo_id: String,
    pub agent_id: String,
    pub agent_ip: String,
    pub org_client_id: String,
    pub client_id: String,
    pub bridge_ip: String,
    pub bridge_port: u16,
    pub video_ssrc: u32,
    pub audio_ssrc: u32,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub layers: Vec<Layer>,
    /// Where the mixer `ready` event goes; nothing is sent when empty
    #[serde(default)]
    pub reply_to: String,
}

impl MixerConfig {
    /// How many layers take their input from `stream_id`
    pub fn stream_use_count(&self, stream_id: &str) -> usize {
        self.layers
            .iter()
            .filter(|layer| layer.stream_id == stream_id)
            .count()
    }
}
