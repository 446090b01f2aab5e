//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every admission / event decision:
//!     → audit.rs (bounded append-only decision log, queryable)
//!     → metrics.rs (snapshot counters + Prometheus gauges)
//!     → alert thresholds compared on each snapshot recompute
//!
//! Consumers:
//!     → /admin/audit, /admin/metrics (read-only query surface)
//!     → Prometheus scrape endpoint
//!     → structured tracing to stdout
//! ```
//!
//! # Design Decisions
//! - Audit capacity trims in batches to a target, never one-at-a-time
//! - Alerts are signals (log + counter) only; they never block traffic
//! - Violation counters decay stepwise on cleanup, floored at zero

pub mod audit;
pub mod metrics;

pub use audit::{AuditEventType, AuditLog, AuditQuery, AuditRecord, Severity};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
