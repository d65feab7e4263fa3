//! Per-client resource sets

use std::collections::HashMap;
use std::sync::Arc;

use crate::external::Recorder;
use crate::session::{Connection, MixerConn};

/// Everything one client owns on this node
///
/// Publishers are keyed by published stream id, subscribers by the stream
/// id subscribed to, mixers by mixer id and recorders by recorded stream id.
#[derive(Default)]
pub struct Client {
    id: String,
    pub publishers: HashMap<String, Arc<Connection>>,
    pub subscribers: HashMap<String, Arc<Connection>>,
    pub mixers: HashMap<String, Arc<MixerConn>>,
    pub recorders: HashMap<String, Arc<dyn Recorder>>,
}

impl Client {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True only when all four resource maps are empty
    pub fn can_remove(&self) -> bool {
        self.publishers.is_empty()
            && self.subscribers.is_empty()
            && self.mixers.is_empty()
            && self.recorders.is_empty()
    }

    /// Close and drop every resource
    pub fn close_all(&mut self) {
        for (_, connection) in self.subscribers.drain() {
            connection.close();
        }
        for (_, connection) in self.publishers.drain() {
            connection.close();
        }
        for (_, mixer) in self.mixers.drain() {
            mixer.close();
        }
        for (_, recorder) in self.recorders.drain() {
            recorder.close();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("publishers", &self.publishers.len())
            .field("subscribers", &self.subscribers.len())
            .field("mixers", &self.mixers.len())
            .field("recorders", &self.recorders.len())
            .finish()
    }
}
