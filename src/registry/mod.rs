//! Shared relay state
//!
//! ```text
//!        ClientTable (Mutex)                 BridgeTable (Mutex)
//!   ┌──────────────────────────┐       ┌──────────────────────────┐
//!   │ "c1" ─► Client {         │       │ "b1" ─► BridgeConn (send)│
//!   │   publishers  {s1: Conn} │       │ "b2" ─► BridgeConn (recv)│
//!   │   subscribers {...}      │       └──────────────────────────┘
//!   │   mixers      {...}      │
//!   │   recorders   {...}      │
//!   │ }                        │
//!   └──────────────────────────┘
//! ```
//!
//! These are the only process-wide mutable structures. Nothing outside
//! the table methods iterates them.

pub mod client;
pub mod store;

pub use client::Client;
pub use store::{BridgeTable, ClientTable};
