//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use live_gateway::config::GatewayConfig;
use live_gateway::gateway::middleware::{HandlerRegistry, ValidationMiddleware};
use live_gateway::gateway::SecurityGateway;
use live_gateway::http::{create_router, AppState};

/// Start a gateway on `addr` with a mutated default config. Returns the
/// gateway handle for direct assertions.
pub async fn start_gateway(
    addr: SocketAddr,
    configure: impl FnOnce(&mut GatewayConfig),
) -> Arc<SecurityGateway> {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = addr.to_string();
    config.origins.allowed = vec!["https://*.example.com".to_string()];
    configure(&mut config);

    let gateway = SecurityGateway::new(config);
    let middleware = ValidationMiddleware::new(gateway.clone(), Arc::new(HandlerRegistry::new()));
    let state = Arc::new(AppState { middleware });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    gateway
}

/// Build a WebSocket upgrade request carrying an origin and, optionally,
/// the pre-verified identity headers the upstream auth terminator attaches.
#[allow(dead_code)]
pub fn ws_request(
    addr: SocketAddr,
    origin: &str,
    user_id: Option<&str>,
) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert("Origin", origin.parse().unwrap());
    if let Some(user_id) = user_id {
        headers.insert("x-user-id", user_id.parse().unwrap());
        headers.insert("x-user-role", "viewer".parse().unwrap());
    }
    request
}
