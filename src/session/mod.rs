//! Connection lifecycle
//!
//! ```text
//!   Client "c1"
//!     publishers  { "s1" ──► Connection (session + FanOutProcessor) }
//!     subscribers { "s9" ──► Connection (session sink)              }
//!
//!   BridgeConn "b1" ──► BridgeMediaStream ──► BridgeIo
//! ```
//!
//! A [`Connection`] wraps a local WebRTC session, a [`BridgeConn`] a stream
//! on the inter-process bridge and a [`MixerConn`] an external mixer. The
//! orchestrator creates and closes them; the registry tables store them.

pub mod bridge_conn;
pub mod connection;
pub mod context;
pub mod event;
pub mod mixer_conn;
pub mod state;

pub use bridge_conn::BridgeConn;
pub use connection::{Connection, SubscriptionSource};
pub use context::{ConnectionContext, NodeContext};
pub use event::{EventType, RelayEvent};
pub use mixer_conn::MixerConn;
pub use state::{ConnectionPhase, ConnectionState};
