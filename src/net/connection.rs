//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Pending → Accepted → Active → Closed, or
//!   Pending → Rejected)
//! - Generate unique connection IDs for tracing and the audit log
//! - Carry handshake metadata and the pre-verified identity
//! - Expose the outbound channel the gateway uses for notices and forced
//!   disconnects

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::http::protocol::ServerMessage;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state.
///
/// `Rejected` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake received, admission decision not yet made.
    Pending = 0,
    /// Admission granted, socket upgrade in progress.
    Accepted = 1,
    /// Upgraded and processing events.
    Active = 2,
    /// Removed from the active set.
    Closed = 3,
    /// Admission denied at handshake.
    Rejected = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Accepted,
            2 => Self::Active,
            3 => Self::Closed,
            _ => Self::Rejected,
        }
    }
}

/// Client role attached by the upstream identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Moderator,
    Host,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Self::Viewer),
            "moderator" => Ok(Self::Moderator),
            "host" => Ok(Self::Host),
            "admin" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

/// Pre-verified identity attached at handshake time by the upstream auth
/// terminator. Never validated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: Option<String>,
    pub role: Role,
}

/// Handshake metadata extracted from the upgrade request.
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub remote_ip: IpAddr,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub identity: Option<Identity>,
}

/// Frame pushed to a connection's writer task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Message(ServerMessage),
    /// Transport-level keepalive ping.
    Ping,
    /// Instructs the socket loop to close the connection.
    Close,
}

/// A connection admitted into the active set.
#[derive(Debug)]
pub struct ActiveConnection {
    pub id: ConnectionId,
    pub remote_ip: IpAddr,
    pub origin: Option<String>,
    pub identity: Option<Identity>,
    pub user_agent: Option<String>,
    pub connected_at_ms: u64,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl ActiveConnection {
    pub fn new(handshake: &HandshakeInfo, outbound: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            id: ConnectionId::next(),
            remote_ip: handshake.remote_ip,
            origin: handshake.origin.clone(),
            identity: handshake.identity.clone(),
            user_agent: handshake.user_agent.clone(),
            connected_at_ms: unix_millis(),
            state: AtomicU8::new(ConnectionState::Accepted as u8),
            outbound,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn mark_active(&self) {
        self.state
            .store(ConnectionState::Active as u8, Ordering::Release);
    }

    /// Transition to `Closed`. Returns `false` if the connection was already
    /// closed, letting callers keep disconnect handling exactly-once.
    pub fn mark_closed(&self) -> bool {
        self.state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    /// Rate-limit key: user id when authenticated, remote IP otherwise.
    pub fn source_key(&self) -> String {
        match self.user_id() {
            Some(uid) => uid.to_string(),
            None => self.remote_ip.to_string(),
        }
    }

    /// Best-effort send; a full or closed channel means the socket loop is
    /// already tearing the connection down.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.outbound.send(OutboundFrame::Message(msg)).is_ok()
    }

    /// Queue a transport-level keepalive ping.
    pub fn ping(&self) -> bool {
        self.outbound.send(OutboundFrame::Ping).is_ok()
    }

    /// Signal the socket loop to close the connection.
    pub fn force_close(&self) {
        let _ = self.outbound.send(OutboundFrame::Close);
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake() -> HandshakeInfo {
        HandshakeInfo {
            remote_ip: "10.0.0.1".parse().unwrap(),
            origin: Some("https://watch.example.com".into()),
            user_agent: None,
            identity: None,
        }
    }

    #[test]
    fn connection_id_unique() {
        assert_ne!(ConnectionId::next(), ConnectionId::next());
    }

    #[test]
    fn close_is_exactly_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ActiveConnection::new(&handshake(), tx);
        conn.mark_active();
        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn source_key_prefers_user_id() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut hs = handshake();
        hs.identity = Some(Identity {
            user_id: "u-42".into(),
            username: Some("sam".into()),
            role: Role::Viewer,
        });
        let conn = ActiveConnection::new(&hs, tx);
        assert_eq!(conn.source_key(), "u-42");

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ActiveConnection::new(&handshake(), tx);
        assert_eq!(conn.source_key(), "10.0.0.1");
    }
}
