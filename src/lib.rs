//! # relay-rs
//!
//! Media relay core for a WebRTC selective forwarding server.
//!
//! A relay node accepts WebRTC publishers and subscribers, fans each
//! published stream out to any number of local subscribers, and moves
//! media between nodes over a lightweight UDP bridge. Everything is driven
//! by JSON control messages arriving on a message bus.
//!
//! - [`orchestrator`]: one method per control operation, the exit condition
//! - [`bridge`]: the inter-node UDP transport, framing and retransmission
//! - [`media`]: packets, RTP/RTCP helpers and the fan-out processor
//! - [`external`]: traits for the WebRTC stack, recorder, mixer and bus
//!
//! ## Running a node
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relay_rs::{Collaborators, NodeContext, RelayConfig, RelayNode};
//! # use relay_rs::external::{ChannelBus, MixerFactory, RecorderFactory, WebRtcSessionFactory};
//! # async fn run(
//! #     sessions: Arc<dyn WebRtcSessionFactory>,
//! #     recorders: Arc<dyn RecorderFactory>,
//! #     mixers: Arc<dyn MixerFactory>,
//! # ) -> relay_rs::Result<()> {
//!
//! let config = RelayConfig::with_bridge_addr("0.0.0.0:9000".parse().unwrap());
//! let collaborators = Collaborators {
//!     sessions,
//!     recorders,
//!     mixers,
//!     bus: Arc::new(ChannelBus::new()),
//! };
//!
//! let mut node = RelayNode::start(config, NodeContext::new("agent-1", "erizo-1"), collaborators).await?;
//! node.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await;
//! node.close().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod control;
pub mod error;
pub mod external;
pub mod media;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeConfig, BridgeIo, BridgeMode};
pub use control::{ControlRequest, Method};
pub use error::{Error, Result};
pub use media::{DataPacket, FanOutProcessor, PacketKind};
pub use orchestrator::{Collaborators, Orchestrator};
pub use server::{RelayConfig, RelayNode, StopReason};
pub use session::{NodeContext, RelayEvent};
