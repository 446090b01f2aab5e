//! Live-event admission and security gateway.
//!
//! Sits in front of a live-event messaging channel (chat plus control
//! commands during a live video session; one persistent WebSocket per
//! client) and decides, for every connection attempt and every inbound
//! event, whether to allow, rate-limit, or reject it — keeping an
//! auditable record of those decisions.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────┐
//!                    │                 LIVE GATEWAY                   │
//!                    │                                                │
//!   WS handshake     │  ┌──────┐   ┌────────────┐   ┌─────────────┐  │
//!   ─────────────────┼─▶│ http │──▶│ middleware │──▶│  admission  │  │
//!                    │  └──────┘   └────────────┘   │   gateway   │  │
//!   events           │                              └──────┬──────┘  │
//!   ─────────────────┼────────────────────────────────────▶│         │
//!                    │             ┌────────────────────────┤         │
//!                    │             ▼            ▼           ▼         │
//!                    │      ┌──────────┐ ┌──────────┐ ┌─────────┐    │
//!                    │      │  origin  │ │reputation│ │ payload │    │
//!                    │      └──────────┘ └──────────┘ └─────────┘    │
//!                    │                                                │
//!                    │  ┌──────────────────────────────────────────┐  │
//!                    │  │          Cross-Cutting Concerns           │  │
//!                    │  │  ┌────────┐ ┌───────┐ ┌───────────────┐  │  │
//!                    │  │  │ config │ │ audit │ │ metrics+alerts│  │  │
//!                    │  │  └────────┘ └───────┘ └───────────────┘  │  │
//!                    │  └──────────────────────────────────────────┘  │
//!                    └────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod gateway;
pub mod http;
pub mod net;
pub mod security;

// Cross-cutting concerns
pub mod admin;
pub mod observability;

pub use config::{ConfigPatch, GatewayConfig};
pub use gateway::{HandlerRegistry, SecurityGateway, ValidationMiddleware};
pub use http::{create_router, AppState};
