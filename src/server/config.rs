//! Relay node configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::BridgeConfig;
use crate::media::DEFAULT_PACKET_BUFFER_SIZE;

/// Relay node configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bridge transport settings
    pub bridge: BridgeConfig,

    /// Workers running connection and session-event processing
    pub worker_threads: usize,

    /// Workers running bridge datagram processing
    pub io_worker_threads: usize,

    /// Packets kept per media kind for retransmission
    pub packet_buffer_size: usize,

    /// How often the exit wait re-checks the client table
    pub exit_poll_interval: Duration,

    /// Directory recorder output files are placed in
    pub record_path: PathBuf,

    /// Answer NACKs from the bridge packet history
    pub retransmission_enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            worker_threads: 5,
            io_worker_threads: 5,
            packet_buffer_size: DEFAULT_PACKET_BUFFER_SIZE,
            exit_poll_interval: Duration::from_secs(5),
            record_path: PathBuf::from("/data/record"),
            retransmission_enabled: true,
        }
    }
}

impl RelayConfig {
    /// Create a new config with the bridge bound to `addr`
    pub fn with_bridge_addr(addr: SocketAddr) -> Self {
        Self {
            bridge: BridgeConfig::with_addr(addr),
            ..Default::default()
        }
    }

    pub fn bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count.max(1);
        self
    }

    pub fn io_worker_threads(mut self, count: usize) -> Self {
        self.io_worker_threads = count.max(1);
        self
    }

    pub fn packet_buffer_size(mut self, size: usize) -> Self {
        self.packet_buffer_size = size;
        self
    }

    pub fn exit_poll_interval(mut self, interval: Duration) -> Self {
        self.exit_poll_interval = interval;
        self
    }

    pub fn record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = path.into();
        self
    }

    /// Forward every NACK upstream instead of replaying locally
    pub fn disable_retransmission(mut self) -> Self {
        self.retransmission_enabled = false;
        self
    }
}
