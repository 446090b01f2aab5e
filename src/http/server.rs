//! WebSocket server host using Axum.
//!
//! # Responsibilities
//! - Extract handshake metadata (client IP, Origin, pre-verified identity)
//! - Run the admission decision BEFORE completing the upgrade
//! - Drive the per-connection socket loop: inbound frames through the
//!   validation middleware, outbound notices, keepalive pings, forced closes
//! - Serve /health and mount the admin surface

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::gateway::admission::ConnectionRejection;
use crate::gateway::middleware::{DisconnectGuard, ValidationMiddleware};
use crate::net::connection::{
    ActiveConnection, ConnectionState, HandshakeInfo, Identity, OutboundFrame, Role,
};

/// Interval between keepalive pings to each client.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Body cap for the plain-HTTP routes (admin config patches).
const MAX_HTTP_BODY_BYTES: usize = 64 * 1024;

/// Shared application state.
pub struct AppState {
    pub middleware: ValidationMiddleware,
}

/// Create the gateway router: WebSocket endpoint, health probe, and (when
/// enabled) the admin surface.
pub fn create_router(state: Arc<AppState>) -> Router {
    let gateway = state.middleware.gateway().clone();
    let admin_enabled = gateway.config().admin.enabled;

    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if admin_enabled {
        router = router.merge(crate::admin::setup_admin_router(gateway));
    }

    router.layer(
        tower::ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(MAX_HTTP_BODY_BYTES)),
    )
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state.middleware.gateway().active_connections();
    Json(serde_json::json!({ "status": "ok", "active_connections": active }))
}

/// WebSocket upgrade handler. The admission decision runs before the
/// upgrade completes, so a rejection aborts the handshake with an explicit
/// HTTP status instead of a dead socket.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let handshake = handshake_info(&headers, addr);
    let (tx, rx) = mpsc::unbounded_channel();

    match state.middleware.handshake(&handshake, tx) {
        Ok((conn, guard)) => {
            let middleware = state.middleware.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, middleware, conn, guard, rx))
        }
        Err(rejection) => {
            tracing::debug!(ip = %handshake.remote_ip, %rejection, "Handshake rejected");
            let status = match rejection {
                ConnectionRejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::FORBIDDEN,
            };
            (status, rejection.to_string()).into_response()
        }
    }
}

/// Drive one admitted connection until it closes.
async fn handle_socket(
    socket: WebSocket,
    middleware: ValidationMiddleware,
    conn: Arc<ActiveConnection>,
    guard: DisconnectGuard,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::info!(connection = %conn.id, ip = %conn.remote_ip, "Client connected");

    // Writer task drains the outbound channel; a Close frame ends it.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let result = match frame {
                OutboundFrame::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize outbound message");
                        continue;
                    }
                },
                OutboundFrame::Ping => ws_tx.send(Message::Ping(Vec::new().into())).await,
                OutboundFrame::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let mut keepalive = interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; the welcome frame covers that.
    keepalive.tick().await;

    loop {
        // A forced close (block) deregisters the connection; stop reading
        // from the peer as soon as that happens.
        if conn.state() == ConnectionState::Closed {
            break;
        }

        tokio::select! {
            biased;

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => middleware.dispatch(&conn, &text),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => middleware.dispatch(&conn, text),
                    Err(_) => middleware.gateway().report_malformed_payload(&conn),
                },
                // Protocol-level pings are answered by the library.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(connection = %conn.id, error = %e, "WebSocket error");
                    break;
                }
            },

            _ = keepalive.tick() => {
                if !conn.ping() {
                    break;
                }
            }
        }
    }

    tracing::info!(connection = %conn.id, "Client disconnected");
    guard.disconnect();
    send_task.abort();
}

/// Build handshake metadata from the upgrade request. Identity headers are
/// attached by the upstream auth terminator and consumed as already
/// verified.
fn handshake_info(headers: &HeaderMap, peer: SocketAddr) -> HandshakeInfo {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };

    let identity = header_str("x-user-id").map(|user_id| Identity {
        user_id,
        username: header_str("x-user-name"),
        role: headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .and_then(|r| r.parse().ok())
            .unwrap_or(Role::Viewer),
    });

    HandshakeInfo {
        remote_ip: extract_ip(headers, peer),
        origin: headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        identity,
    }
}

/// Extract the client IP.
///
/// Checks X-Forwarded-For, X-Real-IP, and then falls back to the peer
/// address.
fn extract_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            // Take the first IP in the list.
            if let Some(ip_str) = value.split(',').next() {
                if let Ok(ip) = ip_str.trim().parse() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.parse() {
                return ip;
            }
        }
    }

    peer.ip()
}
