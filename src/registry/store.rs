//! The two shared tables: clients and bridge connections
//!
//! Both are guarded by their own mutex and only reachable through these
//! methods. Callbacks passed to them run with the lock held and must not
//! call back into the same table. Resources taken out of a table are
//! closed by the caller after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::client::Client;
use crate::error::Result;
use crate::session::{BridgeConn, Connection, MixerConn};

/// Clients by client id
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: Mutex<HashMap<String, Client>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the client, creating it first if needed
    pub fn with_client_or_create<R>(&self, client_id: &str, f: impl FnOnce(&mut Client) -> R) -> R {
        let mut clients = self.clients.lock();
        let client = clients.entry(client_id.to_string()).or_insert_with(|| {
            tracing::info!(client_id = %client_id, "Client created");
            Client::new(client_id)
        });
        f(client)
    }

    /// Run `f` on an existing client; `None` if there is no such client
    pub fn with_client<R>(&self, client_id: &str, f: impl FnOnce(&mut Client) -> R) -> Option<R> {
        self.clients.lock().get_mut(client_id).map(f)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.lock().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.clients.lock().keys().cloned().collect()
    }

    /// Publisher connection for `stream_id`, whichever client owns it
    pub fn find_publisher(&self, stream_id: &str) -> Option<Arc<Connection>> {
        self.clients
            .lock()
            .values()
            .find_map(|client| client.publishers.get(stream_id).cloned())
    }

    /// Register `connection` as the publisher of `stream_id` for `client_id`
    ///
    /// The stream check and the insert share one lock. If another client
    /// already publishes the stream the connection is handed back unused.
    pub fn insert_publisher(
        &self,
        client_id: &str,
        stream_id: &str,
        connection: Arc<Connection>,
    ) -> std::result::Result<(), Arc<Connection>> {
        let mut clients = self.clients.lock();
        if clients
            .values()
            .any(|client| client.publishers.contains_key(stream_id))
        {
            return Err(connection);
        }
        clients
            .entry(client_id.to_string())
            .or_insert_with(|| {
                tracing::info!(client_id = %client_id, "Client created");
                Client::new(client_id)
            })
            .publishers
            .insert(stream_id.to_string(), connection);
        Ok(())
    }

    pub fn find_mixer(&self, mixer_id: &str) -> Option<Arc<MixerConn>> {
        self.clients
            .lock()
            .values()
            .find_map(|client| client.mixers.get(mixer_id).cloned())
    }

    /// Remove every subscriber connection matching `pred` from every client
    pub fn take_subscribers(&self, pred: impl Fn(&Connection) -> bool) -> Vec<Arc<Connection>> {
        let mut taken = Vec::new();
        for client in self.clients.lock().values_mut() {
            client.subscribers.retain(|_, connection| {
                if pred(connection) {
                    taken.push(connection.clone());
                    false
                } else {
                    true
                }
            });
        }
        taken
    }

    /// Remove the client if it owns nothing
    pub fn remove_if_empty(&self, client_id: &str) -> bool {
        let mut clients = self.clients.lock();
        let removable = clients
            .get(client_id)
            .is_some_and(|client| client.can_remove());
        if removable {
            clients.remove(client_id);
            tracing::info!(client_id = %client_id, "Client removed");
        }
        removable
    }

    /// Remove every client that owns nothing; returns their ids
    pub fn remove_empty(&self) -> Vec<String> {
        let mut removed = Vec::new();
        self.clients.lock().retain(|id, client| {
            if client.can_remove() {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        for id in &removed {
            tracing::info!(client_id = %id, "Client removed");
        }
        removed
    }

    /// Take every client out of the table
    pub fn drain(&self) -> Vec<Client> {
        self.clients.lock().drain().map(|(_, client)| client).collect()
    }
}

/// Bridge connections by bridge id
#[derive(Debug, Default)]
pub struct BridgeTable {
    bridges: Mutex<HashMap<String, Arc<BridgeConn>>>,
}

impl BridgeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bridge_id: &str) -> Option<Arc<BridgeConn>> {
        self.bridges.lock().get(bridge_id).cloned()
    }

    pub fn contains(&self, bridge_id: &str) -> bool {
        self.bridges.lock().contains_key(bridge_id)
    }

    /// Existing bridge for `bridge_id`, or the one `open` creates
    ///
    /// The flag is true when a new bridge was opened. `open` runs with the
    /// table locked, so two callers never open the same id twice.
    pub fn get_or_open(
        &self,
        bridge_id: &str,
        open: impl FnOnce() -> Result<Arc<BridgeConn>>,
    ) -> Result<(Arc<BridgeConn>, bool)> {
        let mut bridges = self.bridges.lock();
        if let Some(existing) = bridges.get(bridge_id) {
            return Ok((existing.clone(), false));
        }
        let bridge = open()?;
        bridges.insert(bridge_id.to_string(), bridge.clone());
        Ok((bridge, true))
    }

    pub fn remove(&self, bridge_id: &str) -> Option<Arc<BridgeConn>> {
        self.bridges.lock().remove(bridge_id)
    }

    /// Remove `bridge_id` only if nothing holds it open any more
    pub fn remove_if_unused(&self, bridge_id: &str) -> Option<Arc<BridgeConn>> {
        let mut bridges = self.bridges.lock();
        if !bridges.get(bridge_id)?.is_unused() {
            return None;
        }
        bridges.remove(bridge_id)
    }

    /// Remove every bridge matching `pred`
    pub fn remove_where(&self, pred: impl Fn(&BridgeConn) -> bool) -> Vec<Arc<BridgeConn>> {
        let mut removed = Vec::new();
        self.bridges.lock().retain(|_, bridge| {
            if pred(bridge) {
                removed.push(bridge.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.bridges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.bridges.lock().keys().cloned().collect()
    }

    pub fn drain(&self) -> Vec<Arc<BridgeConn>> {
        self.bridges.lock().drain().map(|(_, bridge)| bridge).collect()
    }
}
