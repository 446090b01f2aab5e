//! End-to-end WebSocket flows: handshake admission, event validation,
//! rejection notices, and forced disconnection.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

mod common;

async fn next_json(
    ws: &mut (impl StreamExt<Item = Result<Message, WsError>> + Unpin),
) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error")
        {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn handshake_accepts_and_acks_chat_event() {
    let addr: SocketAddr = "127.0.0.1:28481".parse().unwrap();
    let gateway = common::start_gateway(addr, |_| {}).await;

    let request = common::ws_request(addr, "https://watch.example.com", Some("u-1"));
    let (mut ws, _) = connect_async(request).await.expect("handshake rejected");

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(gateway.active_connections(), 1);

    ws.send(Message::Text(
        r#"{"event":"chat:message","data":{"message":"hello stream"}}"#.into(),
    ))
    .await
    .unwrap();

    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["event"], "chat:message");

    ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.active_connections(), 0);
}

#[tokio::test]
async fn invalid_origin_aborts_handshake_with_403() {
    let addr: SocketAddr = "127.0.0.1:28482".parse().unwrap();
    let _gateway = common::start_gateway(addr, |_| {}).await;

    let request = common::ws_request(addr, "https://evil.com", Some("u-1"));
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP 403 rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn connection_rate_limit_aborts_handshake_with_429() {
    let addr: SocketAddr = "127.0.0.1:28483".parse().unwrap();
    let _gateway = common::start_gateway(addr, |c| {
        c.rate_limits.connections_per_window = 1;
        c.rate_limits.connection_window_secs = 60;
    })
    .await;

    let request = common::ws_request(addr, "https://watch.example.com", Some("u-1"));
    let (_ws, _) = connect_async(request).await.expect("first handshake");

    let request = common::ws_request(addr, "https://watch.example.com", Some("u-1"));
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 429),
        other => panic!("expected HTTP 429 rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn unknown_event_gets_error_notice_only_to_sender() {
    let addr: SocketAddr = "127.0.0.1:28484".parse().unwrap();
    let _gateway = common::start_gateway(addr, |_| {}).await;

    let request = common::ws_request(addr, "https://watch.example.com", Some("u-1"));
    let (mut ws, _) = connect_async(request).await.unwrap();
    let _welcome = next_json(&mut ws).await;

    ws.send(Message::Text(
        r#"{"event":"cart:checkout","data":{}}"#.into(),
    ))
    .await
    .unwrap();

    let notice = next_json(&mut ws).await;
    assert_eq!(notice["type"], "error");
    assert_eq!(notice["event"], "cart:checkout");
    assert_eq!(notice["message"], "unknown event type");
}

#[tokio::test]
async fn overlong_chat_text_is_rejected_and_audited() {
    let addr: SocketAddr = "127.0.0.1:28485".parse().unwrap();
    let gateway = common::start_gateway(addr, |c| {
        c.limits.max_message_chars = 10;
    })
    .await;

    let request = common::ws_request(addr, "https://watch.example.com", Some("u-1"));
    let (mut ws, _) = connect_async(request).await.unwrap();
    let _welcome = next_json(&mut ws).await;

    ws.send(Message::Text(
        r#"{"event":"chat:message","data":{"message":"this is far too long for the cap"}}"#.into(),
    ))
    .await
    .unwrap();
    let notice = next_json(&mut ws).await;
    assert_eq!(notice["type"], "error");
    assert_eq!(notice["message"], "message too long");

    let last = gateway.audit_recent(1).pop().unwrap();
    assert_eq!(
        serde_json::to_value(last.event_type).unwrap(),
        "MESSAGE_TOO_LONG"
    );
}

#[tokio::test]
async fn blocked_ip_is_force_disconnected() {
    let addr: SocketAddr = "127.0.0.1:28486".parse().unwrap();
    let gateway = common::start_gateway(addr, |_| {}).await;

    let request = common::ws_request(addr, "https://watch.example.com", Some("u-1"));
    let (mut ws, _) = connect_async(request).await.unwrap();
    let _welcome = next_json(&mut ws).await;
    assert_eq!(gateway.active_connections(), 1);

    gateway.block_ip("127.0.0.1".parse().unwrap(), "moderation action");
    assert_eq!(gateway.active_connections(), 0);

    // The socket observes the server-initiated close.
    let mut saw_close = false;
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_secs(5), ws.next()).await
    {
        match frame {
            Ok(Message::Close(_)) | Err(_) => {
                saw_close = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(saw_close, "expected server-initiated close");

    // A fresh attempt from the blocked IP is refused at handshake.
    let request = common::ws_request(addr, "https://watch.example.com", Some("u-1"));
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP 403 rejection, got {:?}", other.map(|_| ())),
    }
}
