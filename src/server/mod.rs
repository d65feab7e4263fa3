//! Relay node
//!
//! [`RelayNode`] owns the bridge transport, the worker pools and the
//! orchestrator, and feeds it control messages from the bus until it is
//! told to stop or the last client leaves.

pub mod config;
pub mod node;

pub use config::RelayConfig;
pub use node::{RelayNode, StopReason};
