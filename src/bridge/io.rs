//! UDP socket pool for the bridge transport
//!
//! ```text
//!                             Arc<BridgeIo>
//!               ┌────────────────────────────────────────┐
//!   datagram ──►│ socket[0..N]  (same ip:port, REUSEPORT) │
//!               │   recv task ── StreamId ──► streams{}  │──► BridgeMediaStream
//!               │   send task ◄── queue[hash(id) % N]    │◄── transmit()
//!               └────────────────────────────────────────┘
//! ```
//!
//! Every socket has one receive task and one send task. Outbound datagrams
//! for a given stream id always go through the same send queue and socket,
//! which keeps per-stream ordering while spreading streams across sockets.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::BridgeConfig;
use super::header::StreamId;
use super::stream::BridgeMediaStream;
use crate::error::{Error, Result};
use crate::stats::TransportStats;

/// Outbound half of the bridge as seen by a stream
pub trait BridgeTransport: Send + Sync {
    /// Queue an already framed datagram for `remote`
    fn send(&self, remote: SocketAddr, stream_id: &StreamId, datagram: Bytes);
}

struct Outbound {
    remote: SocketAddr,
    datagram: Bytes,
}

/// Process-wide bridge transport
pub struct BridgeIo {
    config: BridgeConfig,
    local_addr: SocketAddr,
    sockets: Vec<Arc<UdpSocket>>,
    senders: RwLock<Vec<mpsc::UnboundedSender<Outbound>>>,
    streams: Mutex<HashMap<StreamId, Arc<BridgeMediaStream>>>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: TransportStats,
}

impl BridgeIo {
    /// Bind all sockets and start their tasks
    ///
    /// When the configured port is 0, the port the first socket receives is
    /// reused for the others.
    pub async fn bind(config: BridgeConfig) -> Result<Arc<Self>> {
        let count = config.socket_count.max(1);
        let mut sockets = Vec::with_capacity(count);
        let mut addr = config.bind_addr;

        for _ in 0..count {
            let socket = open_socket(addr, config.socket_buffer_size)?;
            if addr.port() == 0 {
                addr = socket.local_addr()?;
            }
            sockets.push(Arc::new(socket));
        }

        let mut senders = Vec::with_capacity(count);
        let mut receivers = Vec::with_capacity(count);
        for _ in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }

        let io = Arc::new(Self {
            config,
            local_addr: addr,
            sockets,
            senders: RwLock::new(senders),
            streams: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
            stats: TransportStats::default(),
        });

        let mut tasks = Vec::with_capacity(count * 2);
        for (index, rx) in receivers.into_iter().enumerate() {
            let socket = io.sockets[index].clone();
            tasks.push(tokio::spawn(receive_loop(
                Arc::downgrade(&io),
                socket.clone(),
                io.config.mtu,
                io.config.poll_interval,
            )));
            tasks.push(tokio::spawn(send_loop(Arc::downgrade(&io), socket, rx)));
        }
        *io.tasks.lock() = tasks;

        tracing::info!(addr = %io.local_addr, sockets = count, "Bridge transport listening");
        Ok(io)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Socket and send queue used for `id`
    pub fn socket_index(&self, id: &StreamId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.sockets.len() as u64) as usize
    }

    /// Register a stream for inbound routing, replacing any with the same id
    pub fn add_stream(&self, stream: Arc<BridgeMediaStream>) -> Option<Arc<BridgeMediaStream>> {
        let id = *stream.stream_id();
        let replaced = self.streams.lock().insert(id, stream);
        tracing::debug!(stream = %id, replaced = replaced.is_some(), "Bridge stream registered");
        replaced
    }

    pub fn remove_stream(&self, id: &StreamId) -> Option<Arc<BridgeMediaStream>> {
        let removed = self.streams.lock().remove(id);
        if removed.is_some() {
            tracing::debug!(stream = %id, "Bridge stream unregistered");
        }
        removed
    }

    pub fn get_stream(&self, id: &StreamId) -> Option<Arc<BridgeMediaStream>> {
        self.streams.lock().get(id).cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Route a received datagram to the stream named in its header
    ///
    /// Datagrams for unknown streams are dropped: a stream may be removed
    /// while its traffic is still in flight.
    pub fn on_recv(&self, datagram: Bytes) {
        let Some(id) = StreamId::from_datagram(&datagram) else {
            return;
        };
        let stream = self.streams.lock().get(&id).cloned();
        match stream {
            Some(stream) => stream.on_datagram(datagram),
            None => {
                self.stats.record_unknown_stream();
                tracing::trace!(stream = %id, "Datagram for unknown bridge stream");
            }
        }
    }

    /// Stop all tasks and wait for them to finish
    pub async fn close(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.senders.write().clear();
        self.streams.lock().clear();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Bridge task ended abnormally");
            }
        }
        tracing::info!(addr = %self.local_addr, "Bridge transport closed");
    }
}

impl BridgeTransport for BridgeIo {
    fn send(&self, remote: SocketAddr, stream_id: &StreamId, datagram: Bytes) {
        let index = self.socket_index(stream_id);
        let senders = self.senders.read();
        let Some(tx) = senders.get(index) else {
            return;
        };
        if tx.send(Outbound { remote, datagram }).is_err() {
            self.stats.record_send_error();
        }
    }
}

impl std::fmt::Debug for BridgeIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeIo")
            .field("local_addr", &self.local_addr)
            .field("sockets", &self.sockets.len())
            .field("running", &self.is_running())
            .finish()
    }
}

fn open_socket(addr: SocketAddr, buffer_size: usize) -> Result<UdpSocket> {
    let bind_err = |source| Error::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(bind_err)?;

    if buffer_size > 0 {
        if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
            tracing::warn!(error = %e, size = buffer_size, "Failed to set bridge receive buffer");
        }
        if let Err(e) = socket.set_send_buffer_size(buffer_size) {
            tracing::warn!(error = %e, size = buffer_size, "Failed to set bridge send buffer");
        }
    }

    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_err)
}

async fn receive_loop(
    io: Weak<BridgeIo>,
    socket: Arc<UdpSocket>,
    mtu: usize,
    poll_interval: std::time::Duration,
) {
    let mut buf = vec![0u8; mtu];

    loop {
        let received = tokio::time::timeout(poll_interval, socket.recv_from(&mut buf)).await;

        let Some(io) = io.upgrade() else {
            break;
        };
        if !io.is_running() {
            break;
        }

        match received {
            Err(_) => continue,
            Ok(Ok((len, peer))) => {
                if len > 0 && len < mtu {
                    io.on_recv(Bytes::copy_from_slice(&buf[..len]));
                } else {
                    tracing::trace!(peer = %peer, len = len, "Ignoring bridge datagram");
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Bridge receive error");
            }
        }
    }
}

async fn send_loop(
    io: Weak<BridgeIo>,
    socket: Arc<UdpSocket>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(out) = rx.recv().await {
        let result = loop {
            match socket.send_to(&out.datagram, out.remote).await {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        if let Err(e) = result {
            tracing::debug!(remote = %out.remote, error = %e, "Bridge send failed");
            if let Some(io) = io.upgrade() {
                io.stats.record_send_error();
            }
        }
    }
}
