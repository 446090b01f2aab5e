//! Connection identity and lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade request
//!     → HandshakeInfo (peer IP, Origin, User-Agent, pre-verified identity)
//!     → gateway admission decision
//!     → ActiveConnection (tracked in the gateway's active set)
//!     → Closed on disconnect or forced close
//! ```
//!
//! # Design Decisions
//! - Connection IDs are a process-local atomic counter, not UUIDs: cheap,
//!   ordered, and sufficient for a node-local active set
//! - Identity is consumed pre-verified from the auth terminator; this
//!   subsystem never validates credentials

pub mod connection;

pub use connection::{
    ActiveConnection, ConnectionId, ConnectionState, HandshakeInfo, Identity, OutboundFrame, Role,
};
