//! Admission and event-validation subsystem.
//!
//! # Data Flow
//! ```text
//! Handshake:
//!     middleware.rs → admission.rs::admit
//!         blocklist → connection rate → origin → anonymous cap
//!         → active set + audit + metrics, or explicit rejection
//!
//! Inbound event:
//!     middleware.rs → admission.rs::validate_event
//!         rate → allow-list → auth → size → chat length + sanitize
//!         → handler (sanitized payload), or rejection notice
//! ```
//!
//! # Design Decisions
//! - The gateway is an explicitly constructed, dependency-injected instance;
//!   no global singleton
//! - Rejections are typed early-returns handled entirely at this boundary;
//!   request-time failures never propagate out of the middleware
//! - Validators are replaced wholesale on config change, never patched

pub mod admission;
pub mod middleware;

pub use admission::{ConnectionRejection, EventRejection, SecurityGateway};
pub use middleware::{DisconnectGuard, EventHandler, HandlerError, HandlerRegistry, ValidationMiddleware};
