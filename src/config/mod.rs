//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors collected)
//!     → GatewayConfig (validated, immutable snapshot)
//!     → shared via ArcSwap to the gateway
//!
//! On reload signal:
//!     watcher.rs detects change
//!     → loader.rs loads + validates new config
//!     → gateway swaps the snapshot and rebuilds validators
//!
//! At runtime:
//!     PATCH /admin/config → ConfigPatch
//!     → full-merge onto the current snapshot
//!     → validation.rs → gateway swap
//! ```
//!
//! # Design Decisions
//! - Config snapshots are immutable; replacement is atomic, never in-place
//! - A corrupt config fails fast at startup and is rejected on reload
//! - All fields have defaults to allow minimal configs

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AlertConfig, AuditConfig, ConfigPatch, EventRuleConfig, GatewayConfig,
    LimitsConfig, ListenerConfig, ObservabilityConfig, OriginConfig, RateLimitConfig,
    ReputationConfig,
};
pub use validation::{validate_config, ValidationError};
