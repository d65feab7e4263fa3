//! Typed control payloads
//!
//! Every payload is deserialized in full before the orchestrator touches
//! any state, so a missing or mistyped field aborts the message with no
//! side effects. [`Validate`] adds the checks serde cannot express, mostly
//! that the ids used as table keys are non-empty.

use serde::{Deserialize, Serialize};

use super::mixer::{Layer, LayerRef};
use crate::error::{Error, Result};

/// Post-deserialization checks
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_port(field: &'static str, port: u16) -> Result<()> {
    if port == 0 {
        return Err(Error::invalid(format!("{} must not be zero", field)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPublisher {
    pub appid: i64,
    pub room_id: String,
    pub client_id: String,
    pub stream_id: String,
    pub label: String,
    pub reply_to: String,
}

impl Validate for AddPublisher {
    fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("stream_id", &self.stream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePublisher {
    pub appid: i64,
    pub room_id: String,
    pub client_id: String,
    pub stream_id: String,
}

impl Validate for RemovePublisher {
    fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("stream_id", &self.stream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSubscriber {
    pub appid: i64,
    pub room_id: String,
    pub id: String,
    pub client_id: String,
    pub is_bridge: bool,
    pub bridge_id: String,
    pub subscribe_to: String,
    pub label: String,
    pub reply_to: String,
}

impl Validate for AddSubscriber {
    fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("subscribe_to", &self.subscribe_to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSubscriber {
    pub appid: i64,
    pub room_id: String,
    pub client_id: String,
    pub id: String,
    pub subscribe_to: String,
    pub is_bridge: bool,
    pub bridge_id: String,
}

impl Validate for RemoveSubscriber {
    fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("subscribe_to", &self.subscribe_to)
    }
}

/// Remote media entering this process over the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddVirtualPublisher {
    pub appid: i64,
    pub id: String,
    pub src_stream_id: String,
    pub sender_ip: String,
    pub sender_port: u16,
    #[serde(rename = "videoSSRC")]
    pub video_ssrc: u32,
    #[serde(rename = "audioSSRC")]
    pub audio_ssrc: u32,
}

impl Validate for AddVirtualPublisher {
    fn validate(&self) -> Result<()> {
        require("id", &self.id)?;
        require("srcStreamId", &self.src_stream_id)?;
        require("senderIp", &self.sender_ip)?;
        require_port("senderPort", self.sender_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveVirtualPublisher {
    pub appid: i64,
    pub room_id: String,
    pub src_stream_id: String,
    pub id: String,
}

impl Validate for RemoveVirtualPublisher {
    fn validate(&self) -> Result<()> {
        require("id", &self.id)
    }
}

/// Local media leaving this process over the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddVirtualSubscriber {
    pub appid: i64,
    pub id: String,
    pub src_stream_id: String,
    pub recver_ip: String,
    pub recver_port: u16,
}

impl Validate for AddVirtualSubscriber {
    fn validate(&self) -> Result<()> {
        require("id", &self.id)?;
        require("srcStreamId", &self.src_stream_id)?;
        require("recverIp", &self.recver_ip)?;
        require_port("recverPort", self.recver_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveVirtualSubscriber {
    pub appid: i64,
    pub room_id: String,
    pub src_stream_id: String,
    pub id: String,
}

impl Validate for RemoveVirtualSubscriber {
    fn validate(&self) -> Result<()> {
        require("id", &self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRecorder {
    pub appid: i64,
    pub room_id: String,
    pub client_id: String,
    pub stream_id: String,
    pub record_types: Vec<String>,
    pub reply_to: String,
    pub bridge_id: String,
}

impl Validate for AddRecorder {
    fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("stream_id", &self.stream_id)?;
        require("bridge_id", &self.bridge_id)?;
        if self.record_types.iter().any(String::is_empty) {
            return Err(Error::invalid("record_types must not contain empty entries"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRecorder {
    pub appid: i64,
    pub room_id: String,
    pub client_id: String,
    pub stream_id: String,
    pub bridge_id: String,
}

impl Validate for RemoveRecorder {
    fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("stream_id", &self.stream_id)
    }
}

/// ICE candidate as sent by the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: i32,
    pub sdp_mid: String,
    pub candidate: String,
}

/// Body of a `signallingMsg`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer { sdp: String },
    Candidate { candidate: Candidate },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signalling {
    pub client_id: String,
    pub stream_id: String,
    pub msg: SignalMessage,
}

impl Validate for Signalling {
    fn validate(&self) -> Result<()> {
        require("client_id", &self.client_id)?;
        require("stream_id", &self.stream_id)
    }
}

/// `addMixerLayer` arguments: `{"args": [mixer_id, layer, reply_to]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMixerLayer {
    pub args: (String, Layer, String),
}

impl AddMixerLayer {
    pub fn mixer_id(&self) -> &str {
        &self.args.0
    }

    pub fn layer(&self) -> &Layer {
        &self.args.1
    }

    pub fn reply_to(&self) -> &str {
        &self.args.2
    }
}

impl Validate for AddMixerLayer {
    fn validate(&self) -> Result<()> {
        require("mixer id", self.mixer_id())?;
        require("layer stream_id", &self.layer().stream_id)?;
        if self.layer().bridge_stream.is_none() {
            return Err(Error::invalid("layer has no bridge_stream"));
        }
        Ok(())
    }
}

/// `removeMixerLayer` arguments: `{"args": [mixer_id, {stream_id, index}, reply_to]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMixerLayer {
    pub args: (String, LayerRef, String),
}

impl RemoveMixerLayer {
    pub fn mixer_id(&self) -> &str {
        &self.args.0
    }

    pub fn layer(&self) -> &LayerRef {
        &self.args.1
    }
}

impl Validate for RemoveMixerLayer {
    fn validate(&self) -> Result<()> {
        require("mixer id", self.mixer_id())?;
        require("layer stream_id", &self.layer().stream_id)
    }
}

impl Validate for super::mixer::MixerConfig {
    fn validate(&self) -> Result<()> {
        require("id", &self.id)?;
        require("client_id", &self.client_id)?;
        if self.layers.iter().any(|layer| layer.bridge_stream.is_none()) {
            return Err(Error::invalid("every mixer layer needs a bridge_stream"));
        }
        Ok(())
    }
}
