//! Gateway metrics: on-demand snapshot aggregation, decaying violation
//! counters, alert thresholds, and Prometheus exposition.
//!
//! Snapshots are derived from the active-connection set plus the reputation
//! manager's cumulative counters; nothing here is independently persisted.
//! Alerts compare a snapshot to configured thresholds and emit a log line
//! and a counter — they never block traffic.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;
use crate::security::ReputationMetrics;

/// Point-in-time view over connection and violation counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub anonymous_connections: u64,
    pub authenticated_connections: u64,
    pub blocked_attempts: u64,
    pub suspicious_activities: u64,
    pub rate_limit_violations: u64,
    pub payload_violations: u64,
}

/// Counts over the live active set, supplied by the gateway.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveCounts {
    pub active: u64,
    pub anonymous: u64,
    pub authenticated: u64,
}

#[derive(Default)]
pub struct MetricsAggregator {
    total_connections: AtomicU64,
    rate_limit_violations: AtomicU64,
    payload_violations: AtomicU64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_connections_total").increment(1);
    }

    pub fn record_disconnection(&self) {
        counter!("gateway_disconnections_total").increment(1);
    }

    pub fn record_rejected_connection(&self, reason: &'static str) {
        counter!("gateway_rejected_connections_total", "reason" => reason).increment(1);
    }

    pub fn record_rejected_event(&self, reason: &'static str) {
        counter!("gateway_rejected_events_total", "reason" => reason).increment(1);
    }

    pub fn record_rate_limit_violation(&self) {
        self.rate_limit_violations.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_rate_limit_violations_total").increment(1);
    }

    pub fn record_payload_violation(&self) {
        self.payload_violations.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_payload_violations_total").increment(1);
    }

    /// Step the local violation counters toward zero, floored at zero.
    /// Called from the cleanup cycle; cumulative counters are untouched.
    pub fn decay_violations(&self, step: u64) {
        for counter in [&self.rate_limit_violations, &self.payload_violations] {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(step))
            });
        }
    }

    /// Recompute the snapshot and publish the derived gauges.
    pub fn snapshot(&self, active: ActiveCounts, reputation: ReputationMetrics) -> MetricsSnapshot {
        let snapshot = MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: active.active,
            anonymous_connections: active.anonymous,
            authenticated_connections: active.authenticated,
            blocked_attempts: reputation.blocked_attempts,
            suspicious_activities: reputation.suspicious_activities,
            rate_limit_violations: self.rate_limit_violations.load(Ordering::Relaxed),
            payload_violations: self.payload_violations.load(Ordering::Relaxed),
        };

        gauge!("gateway_active_connections").set(snapshot.active_connections as f64);
        gauge!("gateway_anonymous_connections").set(snapshot.anonymous_connections as f64);
        gauge!("gateway_blocked_attempts").set(snapshot.blocked_attempts as f64);

        snapshot
    }

    /// Compare a snapshot against the configured thresholds. Observability
    /// signal only.
    pub fn check_alerts(&self, snapshot: &MetricsSnapshot, thresholds: &AlertConfig) {
        if snapshot.active_connections > thresholds.max_active_connections {
            tracing::warn!(
                active = snapshot.active_connections,
                threshold = thresholds.max_active_connections,
                "Alert: active connections above threshold"
            );
            counter!("gateway_alerts_total", "kind" => "active_connections").increment(1);
        }

        let violations = snapshot.rate_limit_violations + snapshot.payload_violations;
        if violations > thresholds.max_violations {
            tracing::warn!(
                violations,
                threshold = thresholds.max_violations,
                "Alert: violation count above threshold"
            );
            counter!("gateway_alerts_total", "kind" => "violations").increment(1);
        }

        if snapshot.total_connections > 0 {
            let ratio = snapshot.blocked_attempts as f64 / snapshot.total_connections as f64;
            if ratio > thresholds.max_error_ratio {
                tracing::warn!(
                    ratio,
                    threshold = thresholds.max_error_ratio,
                    "Alert: blocked-attempt ratio above threshold"
                );
                counter!("gateway_alerts_total", "kind" => "error_ratio").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_combines_sources() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_accepted_connection();
        aggregator.record_accepted_connection();
        aggregator.record_rate_limit_violation();
        aggregator.record_payload_violation();

        let snapshot = aggregator.snapshot(
            ActiveCounts {
                active: 2,
                anonymous: 1,
                authenticated: 1,
            },
            ReputationMetrics {
                blocked_attempts: 3,
                suspicious_activities: 4,
            },
        );

        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 2);
        assert_eq!(snapshot.anonymous_connections, 1);
        assert_eq!(snapshot.blocked_attempts, 3);
        assert_eq!(snapshot.suspicious_activities, 4);
        assert_eq!(snapshot.rate_limit_violations, 1);
        assert_eq!(snapshot.payload_violations, 1);
    }

    #[test]
    fn violation_decay_floors_at_zero() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_rate_limit_violation();
        aggregator.record_rate_limit_violation();
        aggregator.decay_violations(1);
        let snapshot = aggregator.snapshot(ActiveCounts::default(), ReputationMetrics::default());
        assert_eq!(snapshot.rate_limit_violations, 1);

        aggregator.decay_violations(10);
        let snapshot = aggregator.snapshot(ActiveCounts::default(), ReputationMetrics::default());
        assert_eq!(snapshot.rate_limit_violations, 0);
        assert_eq!(snapshot.payload_violations, 0);
    }
}
