//! Identity carried by connections
//!
//! Every outbound event names the node that produced it and the client,
//! room and stream it concerns. These contexts hold that information so
//! connections never reach back into the orchestrator for it.

use crate::control::{AddPublisher, AddSubscriber};
use crate::external::SessionParams;

/// Identity of this relay node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeContext {
    pub agent_id: String,
    /// Also the binding key control messages are consumed from
    pub erizo_id: String,
}

impl NodeContext {
    pub fn new(agent_id: impl Into<String>, erizo_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            erizo_id: erizo_id.into(),
        }
    }
}

/// Everything a connection knows about who it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub node: NodeContext,
    pub appid: i64,
    pub room_id: String,
    pub client_id: String,
    /// Published stream, or the stream subscribed to
    pub stream_id: String,
    pub label: String,
    /// Event destination; empty means events are not published
    pub reply_to: String,
    pub is_publisher: bool,
}

impl ConnectionContext {
    pub fn publisher(node: &NodeContext, payload: &AddPublisher) -> Self {
        Self {
            node: node.clone(),
            appid: payload.appid,
            room_id: payload.room_id.clone(),
            client_id: payload.client_id.clone(),
            stream_id: payload.stream_id.clone(),
            label: payload.label.clone(),
            reply_to: payload.reply_to.clone(),
            is_publisher: true,
        }
    }

    pub fn subscriber(node: &NodeContext, payload: &AddSubscriber) -> Self {
        Self {
            node: node.clone(),
            appid: payload.appid,
            room_id: payload.room_id.clone(),
            client_id: payload.client_id.clone(),
            stream_id: payload.subscribe_to.clone(),
            label: payload.label.clone(),
            reply_to: payload.reply_to.clone(),
            is_publisher: false,
        }
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            client_id: self.client_id.clone(),
            stream_id: self.stream_id.clone(),
            label: self.label.clone(),
            is_publisher: self.is_publisher,
        }
    }
}
