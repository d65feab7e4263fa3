//! Node startup, control loop and shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bridge::BridgeIo;
use crate::error::Result;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::server::config::RelayConfig;
use crate::session::NodeContext;
use crate::worker::WorkerPool;

/// Why [`RelayNode::run_until`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future completed
    Shutdown,
    /// The last client was removed
    Exit,
    /// The control subscription was closed by the bus
    BusClosed,
}

/// A running relay node
pub struct RelayNode {
    orchestrator: Orchestrator,
    io: Arc<BridgeIo>,
    workers: Arc<WorkerPool>,
    io_workers: Arc<WorkerPool>,
    control: mpsc::UnboundedReceiver<String>,
}

impl RelayNode {
    /// Bind the bridge, start the worker pools and subscribe to the
    /// control binding key (the node's erizo id)
    ///
    /// Failing to bind the bridge or to subscribe is fatal.
    pub async fn start(
        config: RelayConfig,
        node: NodeContext,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let io = BridgeIo::bind(config.bridge.clone()).await?;

        let workers = Arc::new(WorkerPool::start("workers", config.worker_threads));
        let io_workers = Arc::new(WorkerPool::start("io-workers", config.io_worker_threads));

        let control = match collaborators.bus.subscribe(&node.erizo_id) {
            Ok(control) => control,
            Err(e) => {
                io.close().await;
                workers.close().await;
                io_workers.close().await;
                return Err(e);
            }
        };

        tracing::info!(
            agent_id = %node.agent_id,
            erizo_id = %node.erizo_id,
            bridge = %io.local_addr(),
            "Relay node started"
        );

        let orchestrator = Orchestrator::new(
            node,
            &config,
            io.clone(),
            workers.clone(),
            io_workers.clone(),
            collaborators,
        );

        Ok(Self {
            orchestrator,
            io,
            workers,
            io_workers,
            control,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Address the bridge sockets are bound to
    pub fn bridge_addr(&self) -> SocketAddr {
        self.io.local_addr()
    }

    /// Dispatch control messages until `shutdown` completes, the exit
    /// condition is raised or the bus drops the subscription
    pub async fn run_until<F>(&mut self, shutdown: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let Self {
            orchestrator,
            control,
            ..
        } = self;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                StopReason::Shutdown
            }
            _ = orchestrator.wait_exit() => {
                tracing::info!(erizo_id = %orchestrator.node().erizo_id, "Last client left");
                StopReason::Exit
            }
            _ = control_loop(orchestrator, control) => {
                tracing::warn!("Control subscription closed");
                StopReason::BusClosed
            }
        }
    }

    /// Release every client, bridge and worker
    pub async fn close(self) {
        self.orchestrator.close();
        self.io.close().await;
        self.workers.close().await;
        self.io_workers.close().await;
        tracing::info!(erizo_id = %self.orchestrator.node().erizo_id, "Relay node stopped");
    }
}

async fn control_loop(orchestrator: &Orchestrator, control: &mut mpsc::UnboundedReceiver<String>) {
    while let Some(message) = control.recv().await {
        orchestrator.handle_message(&message);
    }
}

impl std::fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("bridge", &self.io.local_addr())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
