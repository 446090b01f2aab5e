//! Bounded, append-only audit log of security decisions.
//!
//! Entries are assigned ids and timestamps on append. Once the configured
//! capacity is exceeded the log trims in one batch down to half of capacity;
//! trimming one entry per insert would turn every append at the boundary
//! into a shift of the whole buffer.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::net::connection::{unix_millis, ConnectionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    ConnectionEstablished,
    ConnectionClosed,
    IpBlocked,
    RateLimitExceeded,
    InvalidOrigin,
    AnonymousLimitReached,
    UnknownEventType,
    AuthenticationFailure,
    PayloadTooLarge,
    MessageTooLong,
    MalformedPayload,
    SuspiciousActivity,
    HandlerFault,
    BlockIssued,
    UnblockIssued,
    ConfigUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One recorded decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: u64,
    pub timestamp_ms: u64,
    pub event_type: AuditEventType,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Fields the caller supplies; id and timestamp are assigned on append.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event_type: AuditEventType,
    pub ip: IpAddr,
    pub connection_id: Option<ConnectionId>,
    pub user_id: Option<String>,
    pub event_name: Option<String>,
    pub message: String,
    pub severity: Severity,
    pub metadata: Value,
}

impl AuditEntry {
    pub fn new(
        event_type: AuditEventType,
        ip: IpAddr,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            ip,
            connection_id: None,
            user_id: None,
            event_name: None,
            message: message.into(),
            severity,
            metadata: Value::Null,
        }
    }

    pub fn connection(mut self, id: ConnectionId) -> Self {
        self.connection_id = Some(id);
        self
    }

    pub fn user(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(|u| u.to_string());
        self
    }

    pub fn event(mut self, name: &str) -> Self {
        self.event_name = Some(name.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Query criteria; `None` fields match everything. Insertion order is
/// preserved in results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub severity: Option<Severity>,
    pub since_ms: Option<u64>,
}

pub struct AuditLog {
    entries: Mutex<Vec<AuditRecord>>,
    next_id: AtomicU64,
    max_entries: usize,
    trim_target: usize,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            max_entries: max_entries.max(2),
            trim_target: (max_entries / 2).max(1),
        }
    }

    pub fn append(&self, entry: AuditEntry) {
        let record = AuditRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: unix_millis(),
            event_type: entry.event_type,
            ip: entry.ip.to_string(),
            connection_id: entry.connection_id,
            user_id: entry.user_id,
            event_name: entry.event_name,
            message: entry.message,
            severity: entry.severity,
            metadata: entry.metadata,
        };

        let mut entries = self.entries.lock().expect("audit log poisoned");
        entries.push(record);
        if entries.len() > self.max_entries {
            let drain = entries.len() - self.trim_target;
            entries.drain(..drain);
        }
    }

    /// Most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let entries = self.entries.lock().expect("audit log poisoned");
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    pub fn query(&self, criteria: &AuditQuery) -> Vec<AuditRecord> {
        let entries = self.entries.lock().expect("audit log poisoned");
        entries
            .iter()
            .filter(|r| {
                criteria.event_type.map_or(true, |t| r.event_type == t)
                    && criteria.ip.as_deref().map_or(true, |ip| r.ip == ip)
                    && criteria
                        .user_id
                        .as_deref()
                        .map_or(true, |u| r.user_id.as_deref() == Some(u))
                    && criteria.severity.map_or(true, |s| r.severity == s)
                    && criteria.since_ms.map_or(true, |t| r.timestamp_ms >= t)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last entry, for decision-path assertions.
    pub fn last(&self) -> Option<AuditRecord> {
        self.entries
            .lock()
            .expect("audit log poisoned")
            .last()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ip: &str, event_type: AuditEventType, severity: Severity) -> AuditEntry {
        AuditEntry::new(event_type, ip.parse().unwrap(), severity, "test entry")
    }

    #[test]
    fn append_assigns_monotonic_ids() {
        let log = AuditLog::new(10);
        log.append(entry("1.1.1.1", AuditEventType::ConnectionEstablished, Severity::Low));
        log.append(entry("1.1.1.1", AuditEventType::ConnectionClosed, Severity::Low));
        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert!(recent[0].id < recent[1].id);
    }

    #[test]
    fn capacity_trims_in_batch_to_target_and_never_reexceeds() {
        let log = AuditLog::new(10);
        for _ in 0..11 {
            log.append(entry("1.1.1.1", AuditEventType::RateLimitExceeded, Severity::Medium));
        }
        // Exceeding max trims down to the target in one batch.
        assert_eq!(log.len(), 5);
        for _ in 0..100 {
            log.append(entry("1.1.1.1", AuditEventType::RateLimitExceeded, Severity::Medium));
            assert!(log.len() <= 10);
        }
    }

    #[test]
    fn trim_drops_oldest_entries() {
        let log = AuditLog::new(4);
        for _ in 0..5 {
            log.append(entry("1.1.1.1", AuditEventType::RateLimitExceeded, Severity::Medium));
        }
        let remaining = log.recent(10);
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining.last().unwrap().id, 5);
    }

    #[test]
    fn query_filters_and_preserves_order() {
        let log = AuditLog::new(100);
        log.append(entry("1.1.1.1", AuditEventType::RateLimitExceeded, Severity::Medium));
        log.append(entry("2.2.2.2", AuditEventType::InvalidOrigin, Severity::High));
        log.append(
            entry("1.1.1.1", AuditEventType::SuspiciousActivity, Severity::High).user(Some("u-1")),
        );

        let by_ip = log.query(&AuditQuery {
            ip: Some("1.1.1.1".into()),
            ..Default::default()
        });
        assert_eq!(by_ip.len(), 2);
        assert!(by_ip[0].id < by_ip[1].id);

        let by_severity = log.query(&AuditQuery {
            severity: Some(Severity::High),
            ..Default::default()
        });
        assert_eq!(by_severity.len(), 2);

        let by_user = log.query(&AuditQuery {
            user_id: Some("u-1".into()),
            ..Default::default()
        });
        assert_eq!(by_user.len(), 1);
        assert_eq!(by_user[0].event_type, AuditEventType::SuspiciousActivity);
    }

    #[test]
    fn event_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&AuditEventType::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
        let json = serde_json::to_string(&Severity::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
