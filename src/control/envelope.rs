//! Control envelope parsing
//!
//! Messages arrive as `{"method": "...", "data": "<JSON text>"}`. The data
//! field is normally a string holding JSON; an inline object is accepted
//! too.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::mixer::MixerConfig;
use super::payload::*;
use crate::error::{Error, Result};

/// Control methods the relay handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    AddPublisher,
    RemovePublisher,
    AddSubscriber,
    RemoveSubscriber,
    AddVirtualPublisher,
    RemoveVirtualPublisher,
    AddVirtualSubscriber,
    RemoveVirtualSubscriber,
    SignallingMsg,
    AddRecorder,
    RemoveRecorder,
    AddMixer,
    AddMixerLayer,
    RemoveMixerLayer,
    RemoveMixer,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::AddPublisher => "addPublisher",
            Method::RemovePublisher => "removePublisher",
            Method::AddSubscriber => "addSubscriber",
            Method::RemoveSubscriber => "removeSubscriber",
            Method::AddVirtualPublisher => "addVirtualPublisher",
            Method::RemoveVirtualPublisher => "removeVirtualPublisher",
            Method::AddVirtualSubscriber => "addVirtualSubscriber",
            Method::RemoveVirtualSubscriber => "removeVirtualSubscriber",
            Method::SignallingMsg => "signallingMsg",
            Method::AddRecorder => "addRecorder",
            Method::RemoveRecorder => "removeRecorder",
            Method::AddMixer => "addMixer",
            Method::AddMixerLayer => "addMixerLayer",
            Method::RemoveMixerLayer => "removeMixerLayer",
            Method::RemoveMixer => "removeMixer",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let method = match s {
            "addPublisher" => Method::AddPublisher,
            "removePublisher" => Method::RemovePublisher,
            "addSubscriber" => Method::AddSubscriber,
            "removeSubscriber" => Method::RemoveSubscriber,
            "addVirtualPublisher" => Method::AddVirtualPublisher,
            "removeVirtualPublisher" => Method::RemoveVirtualPublisher,
            "addVirtualSubscriber" => Method::AddVirtualSubscriber,
            "removeVirtualSubscriber" => Method::RemoveVirtualSubscriber,
            "signallingMsg" => Method::SignallingMsg,
            "addRecorder" => Method::AddRecorder,
            "removeRecorder" => Method::RemoveRecorder,
            "addMixer" => Method::AddMixer,
            "addMixerLayer" => Method::AddMixerLayer,
            "removeMixerLayer" => Method::RemoveMixerLayer,
            "removeMixer" => Method::RemoveMixer,
            other => return Err(Error::UnknownMethod(other.to_string())),
        };
        Ok(method)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    method: String,
    data: Value,
}

/// A fully parsed and validated control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    AddPublisher(AddPublisher),
    RemovePublisher(RemovePublisher),
    AddSubscriber(AddSubscriber),
    RemoveSubscriber(RemoveSubscriber),
    AddVirtualPublisher(AddVirtualPublisher),
    RemoveVirtualPublisher(RemoveVirtualPublisher),
    AddVirtualSubscriber(AddVirtualSubscriber),
    RemoveVirtualSubscriber(RemoveVirtualSubscriber),
    Signalling(Signalling),
    AddRecorder(AddRecorder),
    RemoveRecorder(RemoveRecorder),
    AddMixer(MixerConfig),
    AddMixerLayer(AddMixerLayer),
    RemoveMixerLayer(RemoveMixerLayer),
    RemoveMixer(MixerConfig),
}

fn payload<T>(data: Value) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let value: T = match data {
        Value::String(text) => serde_json::from_str(&text)?,
        Value::Object(_) => serde_json::from_value(data)?,
        _ => return Err(Error::invalid("data must be a JSON string or object")),
    };
    value.validate()?;
    Ok(value)
}

impl ControlRequest {
    /// Parse an envelope and its payload
    pub fn parse(message: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(message)?;
        let method: Method = envelope.method.parse()?;
        let data = envelope.data;

        let request = match method {
            Method::AddPublisher => ControlRequest::AddPublisher(payload(data)?),
            Method::RemovePublisher => ControlRequest::RemovePublisher(payload(data)?),
            Method::AddSubscriber => ControlRequest::AddSubscriber(payload(data)?),
            Method::RemoveSubscriber => ControlRequest::RemoveSubscriber(payload(data)?),
            Method::AddVirtualPublisher => ControlRequest::AddVirtualPublisher(payload(data)?),
            Method::RemoveVirtualPublisher => {
                ControlRequest::RemoveVirtualPublisher(payload(data)?)
            }
            Method::AddVirtualSubscriber => ControlRequest::AddVirtualSubscriber(payload(data)?),
            Method::RemoveVirtualSubscriber => {
                ControlRequest::RemoveVirtualSubscriber(payload(data)?)
            }
            Method::SignallingMsg => ControlRequest::Signalling(payload(data)?),
            Method::AddRecorder => ControlRequest::AddRecorder(payload(data)?),
            Method::RemoveRecorder => ControlRequest::RemoveRecorder(payload(data)?),
            Method::AddMixer => ControlRequest::AddMixer(payload(data)?),
            Method::AddMixerLayer => ControlRequest::AddMixerLayer(payload(data)?),
            Method::RemoveMixerLayer => ControlRequest::RemoveMixerLayer(payload(data)?),
            Method::RemoveMixer => ControlRequest::RemoveMixer(payload(data)?),
        };
        Ok(request)
    }

    pub fn method(&self) -> Method {
        match self {
            ControlRequest::AddPublisher(_) => Method::AddPublisher,
            ControlRequest::RemovePublisher(_) => Method::RemovePublisher,
            ControlRequest::AddSubscriber(_) => Method::AddSubscriber,
            ControlRequest::RemoveSubscriber(_) => Method::RemoveSubscriber,
            ControlRequest::AddVirtualPublisher(_) => Method::AddVirtualPublisher,
            ControlRequest::RemoveVirtualPublisher(_) => Method::RemoveVirtualPublisher,
            ControlRequest::AddVirtualSubscriber(_) => Method::AddVirtualSubscriber,
            ControlRequest::RemoveVirtualSubscriber(_) => Method::RemoveVirtualSubscriber,
            ControlRequest::Signalling(_) => Method::SignallingMsg,
            ControlRequest::AddRecorder(_) => Method::AddRecorder,
            ControlRequest::RemoveRecorder(_) => Method::RemoveRecorder,
            ControlRequest::AddMixer(_) => Method::AddMixer,
            ControlRequest::AddMixerLayer(_) => Method::AddMixerLayer,
            ControlRequest::RemoveMixerLayer(_) => Method::RemoveMixerLayer,
            ControlRequest::RemoveMixer(_) => Method::RemoveMixer,
        }
    }
}
