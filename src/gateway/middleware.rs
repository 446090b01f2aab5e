//! Validation middleware: the boundary between the transport layer and the
//! gateway.
//!
//! Wraps handshake acceptance and every inbound event. Rejections turn into
//! a terse notice to the originating connection only; a handler fault on
//! accepted input is caught exactly here, answered with an error notice,
//! and reported as suspicious activity. Nothing thrown past this boundary
//! ever reaches the host process.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::gateway::admission::{ConnectionRejection, EventRejection, SecurityGateway};
use crate::http::protocol::{ClientEvent, ServerMessage};
use crate::net::connection::{ActiveConnection, ConnectionId, HandshakeInfo, OutboundFrame};

/// Error type event handlers may return. Classified as a handler fault —
/// nothing else — at this boundary.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Application-level handler for one accepted event type. Receives the
/// validated (and possibly sanitized) payload.
pub trait EventHandler: Send + Sync {
    fn handle(&self, conn: &ActiveConnection, payload: &Value) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&ActiveConnection, &Value) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, conn: &ActiveConnection, payload: &Value) -> Result<(), HandlerError> {
        self(conn, payload)
    }
}

/// Event-name → handler table, populated by the host application.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event: &str, handler: impl EventHandler + 'static) {
        self.handlers.insert(event.to_string(), Box::new(handler));
    }

    fn get(&self, event: &str) -> Option<&dyn EventHandler> {
        self.handlers.get(event).map(|h| h.as_ref())
    }
}

/// Guarantees `handle_disconnection` runs exactly once per admitted
/// connection, however the socket loop exits.
pub struct DisconnectGuard {
    gateway: Arc<SecurityGateway>,
    id: ConnectionId,
}

impl DisconnectGuard {
    pub fn disconnect(self) {
        // Drop runs the hook.
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.gateway.handle_disconnection(self.id);
    }
}

/// Wraps gateway calls around the transport's handshake and event stream.
#[derive(Clone)]
pub struct ValidationMiddleware {
    gateway: Arc<SecurityGateway>,
    handlers: Arc<HandlerRegistry>,
}

impl ValidationMiddleware {
    pub fn new(gateway: Arc<SecurityGateway>, handlers: Arc<HandlerRegistry>) -> Self {
        Self { gateway, handlers }
    }

    pub fn gateway(&self) -> &Arc<SecurityGateway> {
        &self.gateway
    }

    /// Admit a handshake. A rejection aborts the upgrade; the caller maps
    /// it onto an explicit transport signal. Success returns the connection
    /// plus the guard that deregisters it.
    pub fn handshake(
        &self,
        handshake: &HandshakeInfo,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Result<(Arc<ActiveConnection>, DisconnectGuard), ConnectionRejection> {
        let conn = self.gateway.admit(handshake, outbound)?;
        let guard = DisconnectGuard {
            gateway: self.gateway.clone(),
            id: conn.id,
        };
        conn.send(ServerMessage::Welcome {
            connection_id: conn.id,
        });
        Ok((conn, guard))
    }

    /// Process one inbound text frame end-to-end: parse, validate, invoke
    /// the handler. Every failure path answers the originating connection
    /// only, then stops.
    pub fn dispatch(&self, conn: &ActiveConnection, frame: &str) {
        let parsed: ClientEvent = match serde_json::from_str(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(connection = %conn.id, error = %e, "Malformed event frame");
                self.gateway.report_malformed_payload(conn);
                conn.send(ServerMessage::Error {
                    message: EventRejection::Malformed.to_string(),
                    event: None,
                });
                return;
            }
        };

        // Chat events draw from the tighter message-send budget before the
        // generic validation sequence runs.
        if self.gateway.is_chat_event(&parsed.event) {
            if let Err(rejection) = self.gateway.validate_message(conn) {
                conn.send(ServerMessage::Error {
                    message: rejection.to_string(),
                    event: Some(parsed.event),
                });
                return;
            }
        }

        let payload = match self.gateway.validate_event(conn, &parsed.event, parsed.data) {
            Ok(payload) => payload,
            Err(rejection) => {
                conn.send(ServerMessage::Error {
                    message: rejection.to_string(),
                    event: Some(parsed.event),
                });
                return;
            }
        };

        match self.handlers.get(&parsed.event) {
            Some(handler) => match handler.handle(conn, &payload) {
                Ok(()) => {
                    conn.send(ServerMessage::Ack {
                        event: parsed.event,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        connection = %conn.id,
                        event = %parsed.event,
                        error = %e,
                        "Event handler fault"
                    );
                    conn.send(ServerMessage::Error {
                        message: "internal error processing event".into(),
                        event: Some(parsed.event.clone()),
                    });
                    self.gateway.report_handler_fault(conn, &parsed.event);
                }
            },
            // Allowed event with no registered handler: acknowledge the
            // admission decision; delivery is the host's concern.
            None => {
                conn.send(ServerMessage::Ack {
                    event: parsed.event,
                });
            }
        }
    }
}
