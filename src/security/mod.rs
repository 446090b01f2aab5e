//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Handshake:
//!     → reputation.rs (blocklist, connection-rate window)
//!     → origin.rs (exact / wildcard-subdomain allow-list)
//!     → anonymous cap (gateway, against the active set)
//!
//! Inbound event:
//!     → reputation.rs (event / message-rate windows)
//!     → payload.rs (allow-list, auth requirement, size, sanitization)
//! ```
//!
//! # Design Decisions
//! - Fail closed: any check failure rejects, never crashes the host
//! - Default deny: unknown event types and unlisted origins are rejected
//! - Validators are rebuilt wholesale on config replacement, never patched

pub mod origin;
pub mod payload;
pub mod reputation;

pub use origin::OriginValidator;
pub use payload::PayloadValidator;
pub use reputation::{ReputationManager, ReputationMetrics, SuspicionOutcome};
