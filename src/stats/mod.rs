//! Statistics for bridge streams and transport

pub mod metrics;

pub use metrics::{BridgeStreamSnapshot, BridgeStreamStats, TransportStats};
