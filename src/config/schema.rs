//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! gateway. All types derive Serde traits for deserialization from config
//! files; every section has defaults so a minimal config is valid.

use serde::{Deserialize, Serialize};

/// Root configuration for the admission gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, backpressure).
    pub listener: ListenerConfig,

    /// Origin allow-list policy.
    pub origins: OriginConfig,

    /// Global sliding-window rate limits.
    pub rate_limits: RateLimitConfig,

    /// Per-event rules; doubles as the event-type allow-list.
    pub events: Vec<EventRuleConfig>,

    /// Payload / message / anonymous-connection caps.
    pub limits: LimitsConfig,

    /// Suspicion scoring and record retention.
    pub reputation: ReputationConfig,

    /// Audit log settings.
    pub audit: AuditConfig,

    /// Alert thresholds for the observability surface.
    pub alerts: AlertConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Logging / metrics exposition settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            origins: OriginConfig::default(),
            rate_limits: RateLimitConfig::default(),
            events: default_event_rules(),
            limits: LimitsConfig::default(),
            reputation: ReputationConfig::default(),
            audit: AuditConfig::default(),
            alerts: AlertConfig::default(),
            admin: AdminConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Origin allow-list policy.
///
/// Entries are exact origins (`https://watch.example.com`) or wildcard
/// subdomain patterns (`https://*.example.com`). Whether a handshake with
/// no Origin header is admitted is policy, not code: non-browser callers
/// set `allow_missing_origin`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    pub allowed: Vec<String>,
    pub allow_missing_origin: bool,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            allowed: vec!["https://*.example.com".to_string()],
            allow_missing_origin: false,
        }
    }
}

/// Global sliding-window rate limits, per source.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Connection attempts allowed per window per IP.
    pub connections_per_window: u32,
    pub connection_window_secs: u64,

    /// Events allowed per window per source (user id, else IP).
    pub events_per_window: u32,
    pub event_window_secs: u64,

    /// Chat messages allowed per window per source; budgeted separately
    /// from (and typically tighter than) generic events.
    pub messages_per_window: u32,
    pub message_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            connections_per_window: 10,
            connection_window_secs: 60,
            events_per_window: 120,
            event_window_secs: 60,
            messages_per_window: 20,
            message_window_secs: 60,
        }
    }
}

/// Rule for one allowed event type. The configured set of rules is the
/// allow-list; events without a rule are rejected.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventRuleConfig {
    /// Event name (e.g., "chat:message").
    pub event: String,

    /// Reject when the connection carries no verified identity.
    #[serde(default)]
    pub requires_auth: bool,

    /// Event carries human-readable chat text in its `message` field,
    /// subject to length checks and sanitization.
    #[serde(default)]
    pub carries_message: bool,

    /// Custom rate budget replacing the global event window. Both fields
    /// must be set together.
    #[serde(default)]
    pub max_per_window: Option<u32>,
    #[serde(default)]
    pub window_secs: Option<u64>,
}

pub(crate) fn default_event_rules() -> Vec<EventRuleConfig> {
    vec![
        EventRuleConfig {
            event: "chat:message".into(),
            requires_auth: true,
            carries_message: true,
            max_per_window: None,
            window_secs: None,
        },
        EventRuleConfig {
            event: "chat:reaction".into(),
            requires_auth: false,
            carries_message: false,
            max_per_window: None,
            window_secs: None,
        },
        EventRuleConfig {
            event: "presence:heartbeat".into(),
            requires_auth: false,
            carries_message: false,
            max_per_window: None,
            window_secs: None,
        },
        EventRuleConfig {
            event: "control:pin-message".into(),
            requires_auth: true,
            carries_message: false,
            max_per_window: Some(10),
            window_secs: Some(60),
        },
        EventRuleConfig {
            event: "control:mute-user".into(),
            requires_auth: true,
            carries_message: false,
            max_per_window: Some(5),
            window_secs: Some(60),
        },
    ]
}

/// Payload and connection caps.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum serialized payload size in bytes.
    pub max_payload_bytes: usize,

    /// Maximum chat message length in characters.
    pub max_message_chars: usize,

    /// Whether unauthenticated connections are admitted at all.
    pub allow_anonymous: bool,

    /// Cap on concurrently active anonymous connections.
    pub max_anonymous_connections: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1_000_000,
            max_message_chars: 500,
            allow_anonymous: true,
            max_anonymous_connections: 200,
        }
    }
}

/// Suspicion scoring and reputation-record retention.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Fixed score increment per suspicious-activity report.
    pub suspicion_increment: u32,

    /// Score at which a source is automatically blocked.
    pub suspicion_block_threshold: u32,

    /// Score decrement applied each cleanup cycle, floored at zero.
    pub suspicion_decay: u32,

    /// Idle horizon after which an unblocked, zero-score record expires.
    pub record_retention_secs: u64,

    /// Cleanup sweep interval.
    pub cleanup_interval_secs: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            suspicion_increment: 10,
            suspicion_block_threshold: 50,
            suspicion_decay: 5,
            record_retention_secs: 3_600,
            cleanup_interval_secs: 60,
        }
    }
}

/// Audit log settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Record rejected decisions and lifecycle events.
    pub enabled: bool,

    /// Capacity; exceeding it trims in one batch to half.
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
        }
    }
}

/// Alert thresholds. Crossing one raises an observability signal only.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    pub max_active_connections: u64,
    pub max_violations: u64,
    /// blocked attempts / total connections.
    pub max_error_ratio: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_active_connections: 5_000,
            max_violations: 500,
            max_error_ratio: 0.5,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable Prometheus metrics exposition.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Partial configuration for runtime replacement via the admin surface.
///
/// Present sections replace their counterpart wholesale (full-merge);
/// absent sections keep the current values. Listener, admin, and
/// observability sections require a restart and are not patchable.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub origins: Option<OriginConfig>,
    pub rate_limits: Option<RateLimitConfig>,
    pub events: Option<Vec<EventRuleConfig>>,
    pub limits: Option<LimitsConfig>,
    pub reputation: Option<ReputationConfig>,
    pub audit: Option<AuditConfig>,
    pub alerts: Option<AlertConfig>,
}

impl ConfigPatch {
    /// Merge onto `base`, producing the replacement configuration.
    pub fn apply(&self, base: &GatewayConfig) -> GatewayConfig {
        let mut merged = base.clone();
        if let Some(origins) = &self.origins {
            merged.origins = origins.clone();
        }
        if let Some(rate_limits) = &self.rate_limits {
            merged.rate_limits = rate_limits.clone();
        }
        if let Some(events) = &self.events {
            merged.events = events.clone();
        }
        if let Some(limits) = &self.limits {
            merged.limits = limits.clone();
        }
        if let Some(reputation) = &self.reputation {
            merged.reputation = reputation.clone();
        }
        if let Some(audit) = &self.audit {
            merged.audit = audit.clone();
        }
        if let Some(alerts) = &self.alerts {
            merged.alerts = alerts.clone();
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(config.audit.enabled);
        assert!(!config.origins.allow_missing_origin);
        // The default allow-list ships with the chat/control event set.
        assert!(config.events.iter().any(|r| r.event == "chat:message"));
    }

    #[test]
    fn patch_replaces_only_present_sections() {
        let base = GatewayConfig::default();
        let patch = ConfigPatch {
            limits: Some(LimitsConfig {
                max_payload_bytes: 42,
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = patch.apply(&base);
        assert_eq!(merged.limits.max_payload_bytes, 42);
        assert_eq!(merged.events, base.events);
        assert_eq!(merged.rate_limits, base.rate_limits);
    }
}
