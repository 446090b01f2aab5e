//! Admin surface: the read/query interface observability tooling consumes,
//! plus moderation actions (block/unblock) and runtime config replacement.
//!
//! Every route requires the configured Bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::gateway::admission::SecurityGateway;
use self::auth::admin_auth_middleware;
use self::handlers::*;

pub fn setup_admin_router(gateway: Arc<SecurityGateway>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/audit", get(get_audit))
        .route("/admin/config", get(get_config).patch(patch_config))
        .route("/admin/block", post(post_block))
        .route("/admin/unblock", post(post_unblock))
        .layer(middleware::from_fn_with_state(
            gateway.clone(),
            admin_auth_middleware,
        ))
        .with_state(gateway)
}
