//! Control-plane orchestration
//!
//! The [`Orchestrator`] turns control messages into changes of the two
//! shared tables and the media wiring between their entries. Operations
//! live next to the resources they manage:
//!
//! - `streams`: local publishers and subscribers, signalling
//! - `bridges`: virtual publishers and subscribers, recorders
//! - `mixers`: mixers and their layers
//!
//! Every operation validates and resolves everything it needs before its
//! first mutation. Unknown ids are logged and ignored; only collaborator
//! failures surface as errors, and [`Orchestrator::handle_message`] turns
//! those into warnings as well.

mod bridges;
mod mixers;
mod streams;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bridge::{remote_addr, BridgeIo, BridgeMode, BridgeStreamOptions};
use crate::control::ControlRequest;
use crate::error::Result;
use crate::external::{MessageBus, MixerFactory, RecorderFactory, WebRtcSessionFactory};
use crate::registry::{BridgeTable, ClientTable};
use crate::server::RelayConfig;
use crate::session::{BridgeConn, NodeContext, RelayEvent, SubscriptionSource};
use crate::worker::WorkerPool;

/// External services the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn WebRtcSessionFactory>,
    pub recorders: Arc<dyn RecorderFactory>,
    pub mixers: Arc<dyn MixerFactory>,
    pub bus: Arc<dyn MessageBus>,
}

pub struct Orchestrator {
    node: NodeContext,
    clients: ClientTable,
    bridges: BridgeTable,
    io: Arc<BridgeIo>,
    workers: Arc<WorkerPool>,
    io_workers: Arc<WorkerPool>,
    collaborators: Collaborators,
    record_path: PathBuf,
    packet_buffer_size: usize,
    retransmission: bool,
    exit_poll_interval: Duration,
    exit: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        node: NodeContext,
        config: &RelayConfig,
        io: Arc<BridgeIo>,
        workers: Arc<WorkerPool>,
        io_workers: Arc<WorkerPool>,
        collaborators: Collaborators,
    ) -> Self {
        let (exit, _) = watch::channel(false);
        Self {
            node,
            clients: ClientTable::new(),
            bridges: BridgeTable::new(),
            io,
            workers,
            io_workers,
            collaborators,
            record_path: config.record_path.clone(),
            packet_buffer_size: config.packet_buffer_size,
            retransmission: config.retransmission_enabled,
            exit_poll_interval: config.exit_poll_interval,
            exit,
        }
    }

    /// Identity of this node, stamped on every published event
    pub fn node(&self) -> &NodeContext {
        &self.node
    }

    /// Clients and the resources they own
    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    /// Bridge connections by bridge id
    pub fn bridges(&self) -> &BridgeTable {
        &self.bridges
    }

    /// Parse and apply one control message
    ///
    /// Never fails: malformed messages and failed operations are logged.
    pub fn handle_message(&self, message: &str) {
        match ControlRequest::parse(message) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping control message");
            }
        }
    }

    /// Apply an already parsed request
    pub fn dispatch(&self, request: ControlRequest) {
        let method = request.method();
        tracing::debug!(method = %method, "Control request");

        let result = match request {
            ControlRequest::AddPublisher(p) => self.add_publisher(&p),
            ControlRequest::RemovePublisher(p) => self.remove_publisher(&p),
            ControlRequest::AddSubscriber(p) => self.add_subscriber(&p),
            ControlRequest::RemoveSubscriber(p) => self.remove_subscriber(&p),
            ControlRequest::AddVirtualPublisher(p) => self.add_virtual_publisher(&p),
            ControlRequest::RemoveVirtualPublisher(p) => self.remove_virtual_publisher(&p),
            ControlRequest::AddVirtualSubscriber(p) => self.add_virtual_subscriber(&p),
            ControlRequest::RemoveVirtualSubscriber(p) => self.remove_virtual_subscriber(&p),
            ControlRequest::Signalling(p) => self.process_signalling(&p),
            ControlRequest::AddRecorder(p) => self.add_recorder(&p),
            ControlRequest::RemoveRecorder(p) => self.remove_recorder(&p),
            ControlRequest::AddMixer(config) => self.add_mixer(&config),
            ControlRequest::AddMixerLayer(p) => self.add_mixer_layer(&p),
            ControlRequest::RemoveMixerLayer(p) => self.remove_mixer_layer(&p),
            ControlRequest::RemoveMixer(config) => self.remove_mixer(&config),
        };

        if let Err(e) = result {
            tracing::warn!(method = %method, error = %e, "Control request failed");
        }
    }

    /// Whether the exit condition has been reached
    pub fn exit_requested(&self) -> bool {
        *self.exit.borrow()
    }

    /// Watch the exit condition
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exit.subscribe()
    }

    /// Resolve once the client table has been emptied by a removal
    ///
    /// The flag is re-read every poll interval even without a change
    /// notification.
    pub async fn wait_exit(&self) {
        let mut signal = self.exit.subscribe();
        loop {
            if *signal.borrow_and_update() {
                return;
            }
            if tokio::time::timeout(self.exit_poll_interval, signal.changed())
                .await
                .is_err()
            {
                tracing::debug!(clients = self.clients.len(), "Still waiting for exit");
            }
        }
    }

    /// Raise the exit flag when no client is left
    ///
    /// Called after every removal of a publisher, subscriber, mixer or
    /// recorder.
    fn check_exit(&self) -> bool {
        if !self.clients.is_empty() {
            return false;
        }
        if !self.exit.send_replace(true) {
            tracing::info!(erizo_id = %self.node.erizo_id, "No clients left, relay may exit");
        }
        true
    }

    /// Close every client resource and bridge
    pub fn close(&self) {
        let clients = self.clients.drain();
        let bridges = self.bridges.drain();
        let (client_count, bridge_count) = (clients.len(), bridges.len());

        for mut client in clients {
            client.close_all();
        }
        for bridge in bridges {
            bridge.close();
        }

        tracing::info!(
            clients = client_count,
            bridges = bridge_count,
            "Orchestrator closed"
        );
    }

    fn bridge_options(
        &self,
        bridge_id: &str,
        ip: &str,
        port: u16,
        mode: BridgeMode,
    ) -> Result<BridgeStreamOptions> {
        Ok(BridgeStreamOptions::new(bridge_id, remote_addr(ip, port)?, mode)
            .packet_buffer_size(self.packet_buffer_size)
            .retransmission(self.retransmission)
            .mtu(self.io.config().mtu))
    }

    fn open_bridge(&self, options: BridgeStreamOptions, src_stream_id: &str) -> Result<Arc<BridgeConn>> {
        BridgeConn::open(options, src_stream_id, &self.io, Some(self.io_workers.lease()))
    }

    /// Close bridges already taken out of the table, along with the
    /// subscriber connections fed by them; returns how many connections
    /// were closed
    fn retire_bridges(&self, bridges: Vec<Arc<BridgeConn>>) -> usize {
        let mut closed = 0;
        for bridge in bridges {
            let subscribers = self.clients.take_subscribers(|connection| {
                matches!(
                    connection.subscription(),
                    Some(SubscriptionSource::Bridge(id)) if id == bridge.id()
                )
            });
            closed += subscribers.len();
            for connection in subscribers {
                connection.close();
            }
            bridge.close();
        }
        if closed > 0 {
            self.clients.remove_empty();
        }
        closed
    }

    /// Close `bridge_id` if it is unpinned and nothing is attached to it
    fn release_bridge(&self, bridge_id: &str) -> bool {
        match self.bridges.remove_if_unused(bridge_id) {
            Some(bridge) => {
                tracing::debug!(bridge_id = %bridge_id, "Bridge no longer used");
                self.retire_bridges(vec![bridge]);
                true
            }
            None => false,
        }
    }

    fn publish(&self, destination: &str, event: &RelayEvent) {
        if destination.is_empty() {
            return;
        }
        let published = event
            .to_json()
            .and_then(|message| self.collaborators.bus.publish(destination, message));
        if let Err(e) = published {
            tracing::warn!(destination = %destination, error = %e, "Failed to publish event");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("erizo_id", &self.node.erizo_id)
            .field("clients", &self.clients.len())
            .field("bridges", &self.bridges.len())
            .finish()
    }
}
