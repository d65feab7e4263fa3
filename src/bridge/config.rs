//! Bridge transport configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Largest datagram the bridge sends or accepts, header included
pub const MTU_SIZE: usize = 1500;

/// Width of the stream-id header on every bridge datagram
pub const STREAM_ID_LEN: usize = 18;

/// Socket buffer size used for a single client connection
pub const CLIENT_SOCKET_BUFFER_SIZE: usize = 65536;

/// Bridge transport configuration options
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address every bridge socket binds to
    pub bind_addr: SocketAddr,

    /// Number of sockets (each with its own receive and send task)
    pub socket_count: usize,

    /// SO_RCVBUF / SO_SNDBUF for each socket
    pub socket_buffer_size: usize,

    /// Upper bound on how long a receive task waits before re-checking shutdown
    pub poll_interval: Duration,

    /// Maximum datagram size, header included
    pub mtu: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            socket_count: 5,
            socket_buffer_size: CLIENT_SOCKET_BUFFER_SIZE * 32,
            poll_interval: Duration::from_millis(100),
            mtu: MTU_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the number of sockets (at least one)
    pub fn socket_count(mut self, count: usize) -> Self {
        self.socket_count = count.max(1);
        self
    }

    /// Set the kernel socket buffer size
    pub fn socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = size;
        self
    }

    /// Set the receive poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the MTU; a framed datagram must stay below it, so at least
    /// the header plus one payload byte plus one
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(STREAM_ID_LEN + 2);
        self
    }
}
