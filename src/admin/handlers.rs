use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigPatch, GatewayConfig};
use crate::gateway::admission::SecurityGateway;
use crate::observability::audit::{AuditEventType, AuditQuery, Severity};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_connections: usize,
}

pub async fn get_status(State(gateway): State<Arc<SecurityGateway>>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        active_connections: gateway.active_connections(),
    })
}

pub async fn get_metrics(State(gateway): State<Arc<SecurityGateway>>) -> impl IntoResponse {
    Json(gateway.metrics_snapshot())
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub limit: Option<usize>,
    pub event_type: Option<AuditEventType>,
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub severity: Option<Severity>,
    pub since_ms: Option<u64>,
}

pub async fn get_audit(
    State(gateway): State<Arc<SecurityGateway>>,
    Query(params): Query<AuditParams>,
) -> impl IntoResponse {
    let filtered = params.event_type.is_some()
        || params.ip.is_some()
        || params.user_id.is_some()
        || params.severity.is_some()
        || params.since_ms.is_some();

    let entries = if filtered {
        let criteria = AuditQuery {
            event_type: params.event_type,
            ip: params.ip,
            user_id: params.user_id,
            severity: params.severity,
            since_ms: params.since_ms,
        };
        let mut entries = gateway.audit_query(&criteria);
        if let Some(limit) = params.limit {
            let start = entries.len().saturating_sub(limit);
            entries.drain(..start);
        }
        entries
    } else {
        gateway.audit_recent(params.limit.unwrap_or(100))
    };

    Json(entries)
}

pub async fn get_config(State(gateway): State<Arc<SecurityGateway>>) -> Json<GatewayConfig> {
    let mut config = (*gateway.config()).clone();
    // The key authenticates this very surface; never echo it back.
    config.admin.api_key = "<redacted>".to_string();
    Json(config)
}

pub async fn patch_config(
    State(gateway): State<Arc<SecurityGateway>>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    match gateway.update_config(&patch) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "applied": true }))),
        Err(errors) => {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "applied": false, "errors": messages })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip: IpAddr,
    pub reason: String,
}

pub async fn post_block(
    State(gateway): State<Arc<SecurityGateway>>,
    Json(request): Json<BlockRequest>,
) -> impl IntoResponse {
    gateway.block_ip(request.ip, &request.reason);
    Json(serde_json::json!({ "blocked": request.ip }))
}

#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    pub ip: IpAddr,
}

pub async fn post_unblock(
    State(gateway): State<Arc<SecurityGateway>>,
    Json(request): Json<UnblockRequest>,
) -> impl IntoResponse {
    gateway.unblock_ip(request.ip);
    Json(serde_json::json!({ "unblocked": request.ip }))
}
