//! WebSocket protocol message types.
//!
//! Defines the JSON message format for client-server communication.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::net::connection::ConnectionId;

// ============================================================================
// Client → Server Messages
// ============================================================================

/// A named event with an arbitrary structured payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEvent {
    /// Event name (e.g., "chat:message").
    pub event: String,
    /// Structured payload; validated and possibly sanitized before any
    /// handler sees it.
    #[serde(default)]
    pub data: Value,
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after a successful handshake.
    Welcome { connection_id: ConnectionId },
    /// Delivery acknowledgement for an accepted event.
    Ack { event: String },
    /// Terse rejection or fault notice, sent only to the originating
    /// connection. Never discloses internal detail.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
    /// Pong response to an application-level ping.
    Pong,
}
