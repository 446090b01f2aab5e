//! The security gateway: composes the origin, reputation, and payload
//! validators, owns the active-connection set, and makes every admission
//! and event decision.
//!
//! Decisions short-circuit in a fixed order and fail closed: the gateway
//! degrades by rejecting traffic, never by crashing the host process.

use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{ConfigPatch, GatewayConfig, ValidationError};
use crate::config::validation::validate_config;
use crate::net::connection::{ActiveConnection, ConnectionId, HandshakeInfo, OutboundFrame};
use crate::observability::audit::{AuditEntry, AuditEventType, AuditLog, AuditQuery, AuditRecord, Severity};
use crate::observability::metrics::{ActiveCounts, MetricsAggregator, MetricsSnapshot};
use crate::security::payload::MESSAGE_FIELD;
use crate::security::reputation::SUSPICION_BLOCK_REASON;
use crate::security::{OriginValidator, PayloadValidator, ReputationManager, SuspicionOutcome};

/// Step applied to the local violation counters each cleanup cycle.
const VIOLATION_DECAY_STEP: u64 = 5;

/// Why a handshake was refused. `Display` is the terse client-visible
/// notice; nothing internal leaks through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionRejection {
    #[error("IP in blocklist")]
    Blocklisted,
    #[error("connection rate limit exceeded")]
    RateLimited,
    #[error("origin not allowed")]
    InvalidOrigin,
    #[error("anonymous connection limit reached")]
    AnonymousLimit,
}

impl ConnectionRejection {
    pub fn reason_label(&self) -> &'static str {
        match self {
            Self::Blocklisted => "blocklisted",
            Self::RateLimited => "rate_limited",
            Self::InvalidOrigin => "invalid_origin",
            Self::AnonymousLimit => "anonymous_limit",
        }
    }
}

/// Why an inbound event was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EventRejection {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("unknown event type")]
    UnknownEventType,
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("message too long")]
    MessageTooLong,
    #[error("malformed event")]
    Malformed,
}

impl EventRejection {
    pub fn reason_label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::UnknownEventType => "unknown_event_type",
            Self::AuthenticationRequired => "authentication_required",
            Self::PayloadTooLarge => "payload_too_large",
            Self::MessageTooLong => "message_too_long",
            Self::Malformed => "malformed",
        }
    }
}

/// Orchestrator over the security components and the active set.
///
/// Constructed once by the transport bootstrap and shared by reference
/// with every middleware; validators are swapped atomically on config
/// replacement.
pub struct SecurityGateway {
    config: ArcSwap<GatewayConfig>,
    origins: ArcSwap<OriginValidator>,
    reputation: ArcSwap<ReputationManager>,
    payloads: ArcSwap<PayloadValidator>,
    connections: DashMap<ConnectionId, Arc<ActiveConnection>>,
    anonymous_active: AtomicU64,
    authenticated_active: AtomicU64,
    audit: AuditLog,
    metrics: MetricsAggregator,
}

impl SecurityGateway {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let origins = OriginValidator::new(
            &config.origins.allowed,
            config.origins.allow_missing_origin,
        );
        let reputation =
            ReputationManager::new(config.rate_limits.clone(), config.reputation.clone());
        let payloads = PayloadValidator::new(&config.events, &config.limits);
        let audit = AuditLog::new(config.audit.max_entries);

        Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            origins: ArcSwap::from_pointee(origins),
            reputation: ArcSwap::from_pointee(reputation),
            payloads: ArcSwap::from_pointee(payloads),
            connections: DashMap::new(),
            anonymous_active: AtomicU64::new(0),
            authenticated_active: AtomicU64::new(0),
            audit,
            metrics: MetricsAggregator::new(),
        })
    }

    fn record(&self, entry: AuditEntry) {
        if self.config.load().audit.enabled {
            self.audit.append(entry);
        }
    }

    /// Forward a suspicion report to the reputation manager. Crossing the
    /// threshold blocks the source; the gateway then force-disconnects its
    /// live connections, same as an explicit block.
    fn note_suspicion(&self, ip: IpAddr) {
        let outcome = self.reputation.load().report_suspicious(&ip.to_string());
        if outcome == SuspicionOutcome::NewlyBlocked {
            let closed = self.disconnect_ip(ip);
            self.record(
                AuditEntry::new(
                    AuditEventType::IpBlocked,
                    ip,
                    Severity::Critical,
                    SUSPICION_BLOCK_REASON,
                )
                .metadata(json!({ "closedConnections": closed })),
            );
            tracing::warn!(ip = %ip, closed, "Source auto-blocked on suspicion threshold");
        }
    }

    /// Close and deregister every active connection from `ip`.
    /// O(active connections); only the gateway can see the active set.
    fn disconnect_ip(&self, ip: IpAddr) -> usize {
        let matching: Vec<Arc<ActiveConnection>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().remote_ip == ip)
            .map(|entry| entry.value().clone())
            .collect();

        for conn in &matching {
            conn.force_close();
            self.handle_disconnection(conn.id);
        }
        matching.len()
    }

    /// Atomically reserve an anonymous slot against the cap.
    fn try_reserve_anonymous(&self, cap: u64) -> bool {
        self.anonymous_active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < cap {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Validate a handshake and, on success, admit the connection into the
    /// active set. The checks short-circuit in escalating-signal order.
    pub fn admit(
        &self,
        handshake: &HandshakeInfo,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Result<Arc<ActiveConnection>, ConnectionRejection> {
        let ip = handshake.remote_ip;
        let key = ip.to_string();
        let reputation = self.reputation.load();
        let user_id = handshake.identity.as_ref().map(|i| i.user_id.as_str());

        // 1. Blocklist. Rejected attempts consume no rate-window slot.
        if let Some(reason) = reputation.blocked_reason(&key) {
            reputation.record_blocked_attempt();
            self.metrics.record_rejected_connection("blocklisted");
            self.record(
                AuditEntry::new(
                    AuditEventType::IpBlocked,
                    ip,
                    Severity::Critical,
                    "IP in blocklist",
                )
                .user(user_id)
                .metadata(json!({ "blockReason": reason })),
            );
            self.refresh_metrics();
            return Err(ConnectionRejection::Blocklisted);
        }

        reputation.track_connection(&key, handshake.user_agent.as_deref());

        // 2. Connection rate.
        if !reputation.check_connection_limit(&key) {
            self.metrics.record_rate_limit_violation();
            self.metrics.record_rejected_connection("rate_limited");
            self.record(
                AuditEntry::new(
                    AuditEventType::RateLimitExceeded,
                    ip,
                    Severity::Medium,
                    "connection rate limit exceeded",
                )
                .user(user_id),
            );
            self.note_suspicion(ip);
            self.refresh_metrics();
            return Err(ConnectionRejection::RateLimited);
        }

        // 3. Origin. A bad origin is a stronger intent signal than rate
        // excess.
        if !self.origins.load().is_valid(handshake.origin.as_deref()) {
            self.metrics.record_rejected_connection("invalid_origin");
            self.record(
                AuditEntry::new(
                    AuditEventType::InvalidOrigin,
                    ip,
                    Severity::High,
                    "origin not allowed",
                )
                .user(user_id)
                .metadata(json!({ "origin": handshake.origin })),
            );
            self.note_suspicion(ip);
            self.refresh_metrics();
            return Err(ConnectionRejection::InvalidOrigin);
        }

        // 4. Anonymous policy and cap, only for unauthenticated handshakes.
        if handshake.identity.is_none() {
            let limits = self.config.load().limits.clone();
            let admitted = limits.allow_anonymous
                && self.try_reserve_anonymous(limits.max_anonymous_connections as u64);
            if !admitted {
                let message = if limits.allow_anonymous {
                    "anonymous connection limit reached"
                } else {
                    "anonymous connections not permitted"
                };
                self.metrics.record_rejected_connection("anonymous_limit");
                self.record(AuditEntry::new(
                    AuditEventType::AnonymousLimitReached,
                    ip,
                    Severity::Medium,
                    message,
                ));
                self.refresh_metrics();
                return Err(ConnectionRejection::AnonymousLimit);
            }
        } else {
            self.authenticated_active.fetch_add(1, Ordering::AcqRel);
        }

        let conn = Arc::new(ActiveConnection::new(handshake, outbound));
        self.connections.insert(conn.id, conn.clone());
        conn.mark_active();
        self.metrics.record_accepted_connection();
        self.record(
            AuditEntry::new(
                AuditEventType::ConnectionEstablished,
                ip,
                Severity::Low,
                "connection accepted",
            )
            .connection(conn.id)
            .user(user_id),
        );
        self.refresh_metrics();
        Ok(conn)
    }

    /// Validate one inbound event. Returns the payload to hand to the
    /// handler — possibly a sanitized replacement, never a mutation of the
    /// caller's value.
    pub fn validate_event(
        &self,
        conn: &ActiveConnection,
        event: &str,
        data: Value,
    ) -> Result<Value, EventRejection> {
        let key = conn.source_key();
        let reputation = self.reputation.load();
        let payloads = self.payloads.load();
        let rate_override = payloads.rule(event).and_then(|r| r.rate_override);

        // 1. Event rate, keyed by user id when authenticated.
        if !reputation.check_event_limit(&key, event, rate_override) {
            self.metrics.record_rate_limit_violation();
            self.metrics.record_rejected_event("rate_limited");
            self.record(
                AuditEntry::new(
                    AuditEventType::RateLimitExceeded,
                    conn.remote_ip,
                    Severity::Medium,
                    "event rate limit exceeded",
                )
                .connection(conn.id)
                .user(conn.user_id())
                .event(event),
            );
            return Err(EventRejection::RateLimited);
        }

        // 2. Allow-list. An unlisted event name is treated as a policy
        // probe and reported as suspicion.
        let rule = match payloads.rule(event) {
            Some(rule) => rule.clone(),
            None => {
                self.metrics.record_rejected_event("unknown_event_type");
                self.record(
                    AuditEntry::new(
                        AuditEventType::UnknownEventType,
                        conn.remote_ip,
                        Severity::Medium,
                        "unknown event type",
                    )
                    .connection(conn.id)
                    .user(conn.user_id())
                    .event(event),
                );
                self.note_suspicion(conn.remote_ip);
                return Err(EventRejection::UnknownEventType);
            }
        };

        // 3. Authentication requirement.
        if rule.requires_auth && !conn.is_authenticated() {
            self.metrics.record_rejected_event("authentication_required");
            self.record(
                AuditEntry::new(
                    AuditEventType::AuthenticationFailure,
                    conn.remote_ip,
                    Severity::Medium,
                    "authentication required for event",
                )
                .connection(conn.id)
                .event(event),
            );
            return Err(EventRejection::AuthenticationRequired);
        }

        // 4. Payload size.
        if let Err(measured) = payloads.validate_payload_size(&data) {
            self.metrics.record_payload_violation();
            self.metrics.record_rejected_event("payload_too_large");
            self.record(
                AuditEntry::new(
                    AuditEventType::PayloadTooLarge,
                    conn.remote_ip,
                    Severity::Medium,
                    "payload too large",
                )
                .connection(conn.id)
                .user(conn.user_id())
                .event(event)
                .metadata(json!({ "payloadSize": measured })),
            );
            return Err(EventRejection::PayloadTooLarge);
        }

        // 5. Chat text: length check, then sanitize. The handler receives
        // the sanitized payload.
        let mut data = data;
        if rule.carries_message {
            let replacement = match data.get(MESSAGE_FIELD).and_then(Value::as_str) {
                Some(text) => {
                    if !payloads.validate_message_length(text) {
                        self.metrics.record_payload_violation();
                        self.metrics.record_rejected_event("message_too_long");
                        self.record(
                            AuditEntry::new(
                                AuditEventType::MessageTooLong,
                                conn.remote_ip,
                                Severity::Medium,
                                "message too long",
                            )
                            .connection(conn.id)
                            .user(conn.user_id())
                            .event(event)
                            .metadata(json!({ "messageChars": text.chars().count() })),
                        );
                        return Err(EventRejection::MessageTooLong);
                    }
                    match payloads.sanitize_message(text) {
                        Cow::Owned(clean) => Some(clean),
                        Cow::Borrowed(_) => None,
                    }
                }
                None => None,
            };
            if let Some(clean) = replacement {
                if let Some(object) = data.as_object_mut() {
                    object.insert(MESSAGE_FIELD.to_string(), Value::String(clean));
                }
            }
        }

        Ok(data)
    }

    /// Whether an event is configured to carry chat text, and therefore
    /// subject to the message-send budget.
    pub fn is_chat_event(&self, event: &str) -> bool {
        self.payloads
            .load()
            .rule(event)
            .map(|r| r.carries_message)
            .unwrap_or(false)
    }

    /// A frame that does not parse as an event. Logged terse and low; the
    /// connection only gets a generic notice.
    pub fn report_malformed_payload(&self, conn: &ActiveConnection) {
        self.metrics.record_rejected_event("malformed");
        self.record(
            AuditEntry::new(
                AuditEventType::MalformedPayload,
                conn.remote_ip,
                Severity::Low,
                "malformed event frame",
            )
            .connection(conn.id)
            .user(conn.user_id()),
        );
    }

    /// Check the chat-message send budget, which is isolated from the
    /// generic event window.
    pub fn validate_message(&self, conn: &ActiveConnection) -> Result<(), EventRejection> {
        if self.reputation.load().check_message_limit(&conn.source_key()) {
            return Ok(());
        }
        self.metrics.record_rate_limit_violation();
        self.metrics.record_rejected_event("message_rate_limited");
        self.record(
            AuditEntry::new(
                AuditEventType::RateLimitExceeded,
                conn.remote_ip,
                Severity::Medium,
                "message rate limit exceeded",
            )
            .connection(conn.id)
            .user(conn.user_id()),
        );
        Err(EventRejection::RateLimited)
    }

    /// Remove a connection from the active set. Safe to call more than
    /// once; only the first call per connection has any effect.
    pub fn handle_disconnection(&self, id: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&id) else {
            return;
        };
        if !conn.mark_closed() {
            return;
        }
        if conn.is_authenticated() {
            self.authenticated_active.fetch_sub(1, Ordering::AcqRel);
        } else {
            self.anonymous_active.fetch_sub(1, Ordering::AcqRel);
        }
        self.metrics.record_disconnection();
        self.record(
            AuditEntry::new(
                AuditEventType::ConnectionClosed,
                conn.remote_ip,
                Severity::Low,
                "connection closed",
            )
            .connection(id)
            .user(conn.user_id()),
        );
        self.refresh_metrics();
    }

    /// Record externally observed suspicious behavior on a live connection.
    pub fn report_suspicious(&self, conn: &ActiveConnection, reason: &str) {
        self.record(
            AuditEntry::new(
                AuditEventType::SuspiciousActivity,
                conn.remote_ip,
                Severity::High,
                reason,
            )
            .connection(conn.id)
            .user(conn.user_id()),
        );
        self.note_suspicion(conn.remote_ip);
    }

    /// A handler fault on accepted input is itself an audit-worthy signal.
    pub fn report_handler_fault(&self, conn: &ActiveConnection, event: &str) {
        self.record(
            AuditEntry::new(
                AuditEventType::HandlerFault,
                conn.remote_ip,
                Severity::High,
                "event handler fault",
            )
            .connection(conn.id)
            .user(conn.user_id())
            .event(event),
        );
        self.note_suspicion(conn.remote_ip);
    }

    /// Block a source and force-disconnect its active connections.
    pub fn block_ip(&self, ip: IpAddr, reason: &str) {
        self.reputation.load().block(&ip.to_string(), reason);
        let closed = self.disconnect_ip(ip);
        self.record(
            AuditEntry::new(AuditEventType::BlockIssued, ip, Severity::Critical, reason)
                .metadata(json!({ "closedConnections": closed })),
        );
        tracing::warn!(ip = %ip, reason, closed, "IP blocked");
        self.refresh_metrics();
    }

    pub fn unblock_ip(&self, ip: IpAddr) {
        self.reputation.load().unblock(&ip.to_string());
        self.record(AuditEntry::new(
            AuditEventType::UnblockIssued,
            ip,
            Severity::Low,
            "IP unblocked",
        ));
        tracing::info!(ip = %ip, "IP unblocked");
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.reputation.load().is_blocked(&ip.to_string())
    }

    /// Merge a partial config onto the current one and apply it.
    pub fn update_config(&self, patch: &ConfigPatch) -> Result<(), Vec<ValidationError>> {
        let merged = patch.apply(&self.config.load());
        validate_config(&merged)?;
        self.apply_config(merged);
        Ok(())
    }

    /// Replace the configuration wholesale (hot reload path; the caller has
    /// already validated). An origin change rebuilds the origin validator;
    /// any rate/reputation/limit/event change rebuilds the reputation and
    /// payload validators from scratch — partially-updated validator state
    /// is never observable.
    pub fn apply_config(&self, new: GatewayConfig) {
        let old = self.config.load_full();

        if old.origins != new.origins {
            self.origins.store(Arc::new(OriginValidator::new(
                &new.origins.allowed,
                new.origins.allow_missing_origin,
            )));
        }

        let validators_changed = old.rate_limits != new.rate_limits
            || old.reputation != new.reputation
            || old.events != new.events
            || old.limits != new.limits;
        if validators_changed {
            self.reputation.store(Arc::new(ReputationManager::new(
                new.rate_limits.clone(),
                new.reputation.clone(),
            )));
            self.payloads
                .store(Arc::new(PayloadValidator::new(&new.events, &new.limits)));
        }

        self.config.store(Arc::new(new));
        self.record(AuditEntry::new(
            AuditEventType::ConfigUpdated,
            IpAddr::from([127, 0, 0, 1]),
            Severity::Low,
            "configuration replaced",
        ));
        tracing::info!(validators_rebuilt = validators_changed, "Configuration replaced");
    }

    fn active_counts(&self) -> ActiveCounts {
        ActiveCounts {
            active: self.connections.len() as u64,
            anonymous: self.anonymous_active.load(Ordering::Acquire),
            authenticated: self.authenticated_active.load(Ordering::Acquire),
        }
    }

    /// Recompute the snapshot and run alert checks. Called on every
    /// connection-affecting event.
    fn refresh_metrics(&self) {
        let snapshot = self
            .metrics
            .snapshot(self.active_counts(), self.reputation.load().metrics());
        self.metrics
            .check_alerts(&snapshot, &self.config.load().alerts);
    }

    // ── Read surface (observability tooling) ────────────────────────────

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.active_counts(), self.reputation.load().metrics())
    }

    pub fn audit_recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.audit.recent(limit)
    }

    pub fn audit_query(&self, criteria: &AuditQuery) -> Vec<AuditRecord> {
        self.audit.query(criteria)
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// One decay/expiry pass over reputation records and local violation
    /// counters. Driven by `run_maintenance` on the configured interval.
    pub fn cleanup_cycle(&self) {
        self.reputation.load().cleanup();
        self.metrics.decay_violations(VIOLATION_DECAY_STEP);
    }

    /// Periodic maintenance loop. Spawned by the bootstrap; aborted on
    /// shutdown.
    pub async fn run_maintenance(self: Arc<Self>) {
        let interval_secs = self.config.load().reputation.cleanup_interval_secs.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; skip it so startup isn't a cycle.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.cleanup_cycle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::{Identity, Role};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn gateway(configure: impl FnOnce(&mut GatewayConfig)) -> Arc<SecurityGateway> {
        let mut config = GatewayConfig::default();
        config.origins.allowed = vec!["https://*.example.com".into()];
        configure(&mut config);
        SecurityGateway::new(config)
    }

    fn handshake(ip: &str) -> HandshakeInfo {
        HandshakeInfo {
            remote_ip: ip.parse().unwrap(),
            origin: Some("https://watch.example.com".into()),
            user_agent: Some("test-agent".into()),
            identity: None,
        }
    }

    fn authed(ip: &str, user_id: &str) -> HandshakeInfo {
        let mut hs = handshake(ip);
        hs.identity = Some(Identity {
            user_id: user_id.into(),
            username: None,
            role: Role::Viewer,
        });
        hs
    }

    fn connect(
        gw: &SecurityGateway,
        hs: &HandshakeInfo,
    ) -> Result<(Arc<ActiveConnection>, UnboundedReceiver<OutboundFrame>), ConnectionRejection>
    {
        let (tx, rx) = mpsc::unbounded_channel();
        gw.admit(hs, tx).map(|conn| (conn, rx))
    }

    #[test]
    fn five_connections_accepted_sixth_rate_limited() {
        let gw = gateway(|c| {
            c.rate_limits.connections_per_window = 5;
            c.rate_limits.connection_window_secs = 60;
        });
        let hs = authed("1.2.3.4", "u-1");
        for _ in 0..5 {
            let (conn, _rx) = connect(&gw, &hs).unwrap();
            gw.handle_disconnection(conn.id);
        }
        assert_eq!(
            connect(&gw, &hs).unwrap_err(),
            ConnectionRejection::RateLimited
        );
        let last = gw.audit_recent(1).pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::RateLimitExceeded);
        assert_eq!(last.severity, Severity::Medium);
    }

    #[test]
    fn blocklisted_attempt_consumes_no_window_slot() {
        let gw = gateway(|c| {
            c.rate_limits.connections_per_window = 2;
        });
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        gw.block_ip(ip, "moderation");
        assert!(gw.is_blocked(ip));

        let err = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap_err();
        assert_eq!(err, ConnectionRejection::Blocklisted);
        let last = gw.audit_recent(1).pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::IpBlocked);
        assert_eq!(last.severity, Severity::Critical);
        assert_eq!(last.message, "IP in blocklist");

        // The rejected attempts above consumed no window budget.
        gw.unblock_ip(ip);
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_ok());
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_ok());
    }

    #[test]
    fn unblock_then_fresh_attempt_after_window_expiry() {
        let gw = gateway(|c| {
            c.rate_limits.connections_per_window = 1;
            c.rate_limits.connection_window_secs = 1;
        });
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_ok());
        gw.block_ip(ip, "temporary");
        gw.unblock_ip(ip);
        // Window still holds the earlier attempt.
        assert_eq!(
            connect(&gw, &authed("1.2.3.4", "u-1")).unwrap_err(),
            ConnectionRejection::RateLimited
        );
        std::thread::sleep(Duration::from_millis(1_100));
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_ok());
    }

    #[test]
    fn invalid_origin_escalates_to_auto_block() {
        let gw = gateway(|c| {
            c.reputation.suspicion_increment = 10;
            c.reputation.suspicion_block_threshold = 20;
        });
        let mut hs = authed("6.6.6.6", "u-6");
        hs.origin = Some("https://evil.com".into());

        assert_eq!(
            connect(&gw, &hs).unwrap_err(),
            ConnectionRejection::InvalidOrigin
        );
        // Second probe crosses the threshold and blocks the source.
        assert_eq!(
            connect(&gw, &hs).unwrap_err(),
            ConnectionRejection::InvalidOrigin
        );
        assert!(gw.is_blocked("6.6.6.6".parse().unwrap()));
        assert_eq!(
            connect(&gw, &hs).unwrap_err(),
            ConnectionRejection::Blocklisted
        );
    }

    #[test]
    fn anonymous_cap_and_policy() {
        let gw = gateway(|c| {
            c.limits.allow_anonymous = true;
            c.limits.max_anonymous_connections = 1;
            c.rate_limits.connections_per_window = 100;
        });
        let (_anon, _rx) = connect(&gw, &handshake("1.2.3.4")).unwrap();
        assert_eq!(
            connect(&gw, &handshake("5.6.7.8")).unwrap_err(),
            ConnectionRejection::AnonymousLimit
        );
        // Authenticated connections are unaffected by the anonymous cap.
        assert!(connect(&gw, &authed("5.6.7.8", "u-2")).is_ok());

        let strict = gateway(|c| {
            c.limits.allow_anonymous = false;
        });
        assert_eq!(
            connect(&strict, &handshake("1.2.3.4")).unwrap_err(),
            ConnectionRejection::AnonymousLimit
        );
    }

    #[test]
    fn block_ip_force_disconnects_active_connections() {
        let gw = gateway(|c| {
            c.rate_limits.connections_per_window = 100;
        });
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let (_c1, mut rx1) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        let (_c2, mut rx2) = connect(&gw, &authed("1.2.3.4", "u-2")).unwrap();
        let (_c3, _rx3) = connect(&gw, &authed("9.9.9.9", "u-3")).unwrap();
        assert_eq!(gw.active_connections(), 3);

        gw.block_ip(ip, "abuse");

        assert_eq!(gw.active_connections(), 1);
        assert!(gw.is_blocked(ip));
        assert!(matches!(rx1.try_recv(), Ok(OutboundFrame::Close)));
        assert!(matches!(rx2.try_recv(), Ok(OutboundFrame::Close)));
        assert_eq!(
            connect(&gw, &authed("1.2.3.4", "u-1")).unwrap_err(),
            ConnectionRejection::Blocklisted
        );
    }

    #[test]
    fn unauthenticated_protected_event_rejected() {
        let gw = gateway(|_| {});
        let (conn, _rx) = connect(&gw, &handshake("1.2.3.4")).unwrap();
        let err = gw
            .validate_event(&conn, "chat:message", json!({ "message": "hi" }))
            .unwrap_err();
        assert_eq!(err, EventRejection::AuthenticationRequired);
        let last = gw.audit_recent(1).pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::AuthenticationFailure);
        assert_eq!(last.event_name.as_deref(), Some("chat:message"));
    }

    #[test]
    fn oversized_payload_rejected_with_measured_size() {
        let gw = gateway(|c| {
            c.limits.max_payload_bytes = 1_000_000;
        });
        let (conn, _rx) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        let err = gw
            .validate_event(
                &conn,
                "chat:message",
                json!({ "message": "hi", "blob": "x".repeat(2_000_000) }),
            )
            .unwrap_err();
        assert_eq!(err, EventRejection::PayloadTooLarge);
        let last = gw.audit_recent(1).pop().unwrap();
        assert_eq!(last.event_type, AuditEventType::PayloadTooLarge);
        let size = last.metadata["payloadSize"].as_u64().unwrap();
        assert!(size >= 2_000_000);
    }

    #[test]
    fn chat_text_is_sanitized_into_returned_payload() {
        let gw = gateway(|_| {});
        let (conn, _rx) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        let accepted = gw
            .validate_event(
                &conn,
                "chat:message",
                json!({ "message": "hey <script>alert(1)</script>" }),
            )
            .unwrap();
        let text = accepted["message"].as_str().unwrap();
        assert!(!text.contains("<script>"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn unknown_event_reports_suspicion() {
        let gw = gateway(|c| {
            c.reputation.suspicion_increment = 10;
            c.reputation.suspicion_block_threshold = 20;
        });
        let (conn, _rx) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        assert_eq!(
            gw.validate_event(&conn, "admin:drop-tables", json!({})).unwrap_err(),
            EventRejection::UnknownEventType
        );
        assert_eq!(
            gw.validate_event(&conn, "admin:drop-tables", json!({})).unwrap_err(),
            EventRejection::UnknownEventType
        );
        // Two probes crossed the threshold; the source is now blocked and
        // its connection force-closed.
        assert!(gw.is_blocked("1.2.3.4".parse().unwrap()));
        assert_eq!(gw.active_connections(), 0);
    }

    #[test]
    fn message_budget_isolated_from_event_budget() {
        let gw = gateway(|c| {
            c.rate_limits.messages_per_window = 1;
            c.rate_limits.events_per_window = 100;
        });
        let (conn, _rx) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        assert!(gw.validate_message(&conn).is_ok());
        assert_eq!(
            gw.validate_message(&conn).unwrap_err(),
            EventRejection::RateLimited
        );
        // Generic events still flow.
        assert!(gw
            .validate_event(&conn, "chat:reaction", json!({ "emoji": "🎉" }))
            .is_ok());
    }

    #[test]
    fn disconnection_is_exactly_once() {
        let gw = gateway(|_| {});
        let (conn, _rx) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        let before = gw.audit_recent(100).len();
        gw.handle_disconnection(conn.id);
        gw.handle_disconnection(conn.id);
        let entries = gw.audit_recent(100);
        assert_eq!(entries.len(), before + 1);
        assert_eq!(gw.metrics_snapshot().active_connections, 0);
        assert_eq!(gw.metrics_snapshot().authenticated_connections, 0);
    }

    #[test]
    fn metrics_snapshot_tracks_population() {
        let gw = gateway(|_| {});
        let (_a, _rx1) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        let (_b, _rx2) = connect(&gw, &handshake("5.6.7.8")).unwrap();
        let snapshot = gw.metrics_snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 2);
        assert_eq!(snapshot.anonymous_connections, 1);
        assert_eq!(snapshot.authenticated_connections, 1);
    }

    #[test]
    fn audit_can_be_disabled_by_config() {
        let gw = gateway(|c| {
            c.audit.enabled = false;
        });
        let (_conn, _rx) = connect(&gw, &authed("1.2.3.4", "u-1")).unwrap();
        assert!(gw.audit_recent(10).is_empty());
    }

    #[test]
    fn config_patch_rebuilds_validators_wholesale() {
        let gw = gateway(|c| {
            c.rate_limits.connections_per_window = 1;
        });
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_ok());
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_err());

        // Replacing the rate section rebuilds the reputation manager, so
        // the exhausted window starts fresh.
        let patch = ConfigPatch {
            rate_limits: Some(crate::config::RateLimitConfig {
                connections_per_window: 2,
                ..Default::default()
            }),
            ..Default::default()
        };
        gw.update_config(&patch).unwrap();
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_ok());

        // Origin replacement swaps the origin validator.
        let patch = ConfigPatch {
            origins: Some(crate::config::OriginConfig {
                allowed: vec!["https://only.this.example".into()],
                allow_missing_origin: false,
            }),
            ..Default::default()
        };
        gw.update_config(&patch).unwrap();
        assert_eq!(
            connect(&gw, &authed("5.5.5.5", "u-2")).unwrap_err(),
            ConnectionRejection::InvalidOrigin
        );
    }

    #[test]
    fn invalid_patch_is_rejected_and_ignored() {
        let gw = gateway(|_| {});
        let patch = ConfigPatch {
            rate_limits: Some(crate::config::RateLimitConfig {
                connections_per_window: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(gw.update_config(&patch).is_err());
        // Current config stays in effect.
        assert!(connect(&gw, &authed("1.2.3.4", "u-1")).is_ok());
    }
}
