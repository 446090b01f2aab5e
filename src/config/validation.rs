//! Configuration validation.
//!
//! Semantic checks on top of what serde already guarantees syntactically.
//! Returns all validation errors, not just the first; validation runs
//! before a config is accepted into the system, both at startup and on
//! every runtime replacement.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a valid socket address")]
    BindAddress(String),

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),

    #[error("origin entry '{0}' is not an absolute origin (scheme://host)")]
    MalformedOrigin(String),

    #[error("duplicate event rule '{0}'")]
    DuplicateEventRule(String),

    #[error("event rule '{0}' sets only one of max_per_window / window_secs")]
    PartialRateOverride(String),

    #[error("reputation.suspicion_block_threshold must be >= suspicion_increment")]
    ThresholdBelowIncrement,

    #[error("alerts.max_error_ratio must be within (0, 1]")]
    ErrorRatioRange,
}

/// Pure function: `GatewayConfig` → all semantic errors found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let limits: [(&'static str, u64); 8] = [
        (
            "rate_limits.connections_per_window",
            config.rate_limits.connections_per_window as u64,
        ),
        (
            "rate_limits.connection_window_secs",
            config.rate_limits.connection_window_secs,
        ),
        (
            "rate_limits.events_per_window",
            config.rate_limits.events_per_window as u64,
        ),
        (
            "rate_limits.event_window_secs",
            config.rate_limits.event_window_secs,
        ),
        (
            "rate_limits.messages_per_window",
            config.rate_limits.messages_per_window as u64,
        ),
        (
            "rate_limits.message_window_secs",
            config.rate_limits.message_window_secs,
        ),
        ("limits.max_payload_bytes", config.limits.max_payload_bytes as u64),
        ("limits.max_message_chars", config.limits.max_message_chars as u64),
    ];
    for (name, value) in limits {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(name));
        }
    }

    if config.audit.max_entries < 2 {
        errors.push(ValidationError::ZeroLimit("audit.max_entries"));
    }

    for entry in &config.origins.allowed {
        if !entry.contains("://") {
            errors.push(ValidationError::MalformedOrigin(entry.clone()));
        }
    }

    let mut seen = HashSet::new();
    for rule in &config.events {
        if !seen.insert(rule.event.as_str()) {
            errors.push(ValidationError::DuplicateEventRule(rule.event.clone()));
        }
        if rule.max_per_window.is_some() != rule.window_secs.is_some() {
            errors.push(ValidationError::PartialRateOverride(rule.event.clone()));
        }
    }

    if config.reputation.suspicion_block_threshold < config.reputation.suspicion_increment {
        errors.push(ValidationError::ThresholdBelowIncrement);
    }

    if !(config.alerts.max_error_ratio > 0.0 && config.alerts.max_error_ratio <= 1.0) {
        errors.push(ValidationError::ErrorRatioRange);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
