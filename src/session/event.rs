//! Outbound event messages

use serde::Serialize;
use serde_json::{json, Value};

use super::context::ConnectionContext;
use crate::control::MixerConfig;
use crate::error::Result;
use crate::external::{SessionEvent, SessionEventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    PublisherAnswer,
    SubscriberAnswer,
    Ready,
}

/// Event published to a connection's reply destination
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub app_id: i64,
    pub agent_id: String,
    pub erizo_id: String,
    pub stream_id: String,
    pub client_id: String,
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_publisher: Option<bool>,
}

impl RelayEvent {
    pub fn new(kind: EventType, context: &ConnectionContext) -> Self {
        Self {
            kind,
            app_id: context.appid,
            agent_id: context.node.agent_id.clone(),
            erizo_id: context.node.erizo_id.clone(),
            stream_id: context.stream_id.clone(),
            client_id: context.client_id.clone(),
            room_id: context.room_id.clone(),
            msg: None,
            is_publisher: None,
        }
    }

    /// `ready` event announcing a mixer output as a publisher
    pub fn mixer_ready(config: &MixerConfig) -> Self {
        Self {
            kind: EventType::Ready,
            app_id: config.appid,
            agent_id: config.agent_id.clone(),
            erizo_id: config.erizo_id.clone(),
            stream_id: config.id.clone(),
            client_id: config.client_id.clone(),
            room_id: config.room_id.clone(),
            msg: None,
            is_publisher: Some(true),
        }
    }

    /// Translate a session event; `None` for events that are only logged
    ///
    /// `remote_ssrcs` is (video, audio) as negotiated by the session.
    pub fn from_session(
        context: &ConnectionContext,
        event: &SessionEvent,
        remote_ssrcs: (u32, u32),
    ) -> Option<Self> {
        let relay_event = match event.kind {
            SessionEventKind::Initial => Self::new(EventType::Started, context),
            SessionEventKind::SdpProcessed if context.is_publisher => {
                let (video, audio) = remote_ssrcs;
                let mut relay_event = Self::new(EventType::PublisherAnswer, context);
                relay_event.msg = Some(json!({
                    "sdp": event.message,
                    "videoSSRC": video,
                    "audioSSRC": audio,
                }));
                relay_event
            }
            SessionEventKind::SdpProcessed => {
                let mut relay_event = Self::new(EventType::SubscriberAnswer, context);
                relay_event.msg = Some(json!({ "sdp": event.message }));
                relay_event
            }
            SessionEventKind::Ready => {
                let mut relay_event = Self::new(EventType::Ready, context);
                relay_event.is_publisher = Some(context.is_publisher);
                relay_event
            }
            SessionEventKind::Failed => return None,
        };
        Some(relay_event)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
