//! HTTP / WebSocket transport subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request on /ws
//!     → server.rs (extract handshake metadata, pre-verified identity)
//!     → middleware handshake (admission decision BEFORE the upgrade)
//!     → socket loop (reader dispatches frames, writer drains notices,
//!       keepalive pings, forced closes)
//!
//! /health and /admin/* are plain HTTP on the same listener.
//! ```

pub mod protocol;
pub mod server;

pub use server::{create_router, AppState};
