//! Inter-process bridge transport
//!
//! Media is tunnelled between relay processes as plain UDP datagrams, each
//! prefixed with an 18-byte stream id:
//!
//! ```text
//!   process A                                         process B
//!  ┌───────────────────┐   [id][RTP/RTCP] over UDP   ┌───────────────────┐
//!  │ BridgeMediaStream │ ──────────────────────────► │ BridgeIo          │
//!  │   (send mode)     │ ◄────────────────────────── │  └► stream by id  │
//!  └───────────────────┘        NACK / feedback      │ (receive mode)    │
//!                                                    └───────────────────┘
//! ```
//!
//! [`BridgeIo`] owns the sockets and the id → stream table;
//! [`BridgeMediaStream`] implements framing, SSRC demultiplexing,
//! retransmission and role-dependent delivery for one stream.

pub mod config;
pub mod header;
pub mod io;
pub mod pipeline;
pub mod retransmission;
pub mod stream;

pub use config::{BridgeConfig, MTU_SIZE, STREAM_ID_LEN};
pub use header::{add_bridge_header, remove_bridge_header, StreamId};
pub use io::{BridgeIo, BridgeTransport};
pub use pipeline::SsrcTable;
pub use retransmission::{NackResponse, RetransmissionHandler};
pub use stream::{remote_addr, BridgeMediaStream, BridgeMode, BridgeStreamOptions};
