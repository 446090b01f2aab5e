//! Per-source reputation tracking: sliding-window rate limits, suspicion
//! scoring with automatic escalation to a block, and an explicit blocklist.
//!
//! Sources are keyed by remote IP for connection admission and by user id
//! (falling back to IP) for event traffic. Records are created lazily on
//! first sighting and decayed — never bulk-reset — by the periodic cleanup
//! sweep. Forced disconnection of already-active connections is the
//! gateway's job; this component only owns the per-source state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::{RateLimitConfig, ReputationConfig};
use crate::net::connection::unix_millis;

/// Block reason recorded when suspicion crosses the configured threshold.
pub const SUSPICION_BLOCK_REASON: &str = "suspicion threshold exceeded";

/// Max records examined per cleanup tick. Keeps each tick bounded when the
/// tracked-source set is large; the rotation queue resumes where the last
/// tick stopped.
const SWEEP_BATCH: usize = 4096;

/// Fixed-size sliding window of event timestamps.
#[derive(Debug, Default)]
struct SlidingWindow {
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.hits.front() {
            if now.duration_since(front) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Check-then-increment: records the hit only when under the limit.
    fn try_record(&mut self, now: Instant, window: Duration, max: u32) -> bool {
        self.prune(now, window);
        if self.hits.len() as u32 >= max {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub reason: String,
    pub at_ms: u64,
}

/// Per-source state. Lazily created on first sighting.
#[derive(Debug)]
pub struct ReputationRecord {
    connections: SlidingWindow,
    events: SlidingWindow,
    messages: SlidingWindow,
    /// Windows for events carrying a custom rate rule, keyed by event name.
    custom: HashMap<String, SlidingWindow>,
    pub suspicion_score: u32,
    pub blocked: Option<BlockInfo>,
    pub user_agent: Option<String>,
    last_seen: Instant,
}

impl ReputationRecord {
    fn new(now: Instant) -> Self {
        Self {
            connections: SlidingWindow::default(),
            events: SlidingWindow::default(),
            messages: SlidingWindow::default(),
            custom: HashMap::new(),
            suspicion_score: 0,
            blocked: None,
            user_agent: None,
            last_seen: now,
        }
    }

    fn is_expendable(&self, now: Instant, retention: Duration) -> bool {
        self.blocked.is_none()
            && self.suspicion_score == 0
            && now.duration_since(self.last_seen) >= retention
    }
}

/// Narrow key-value seam over the record map.
///
/// The gateway's validation logic only ever goes through `update`/`read`,
/// so a shared external store can replace the in-memory map without touching
/// that logic. `update` holds the per-key shard lock for the whole closure,
/// which is what serializes every check-then-increment; an asynchronous
/// backing store would need a per-key in-flight guard to keep that property.
struct RecordStore {
    records: DashMap<String, ReputationRecord>,
}

impl RecordStore {
    fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    fn update<R>(&self, key: &str, f: impl FnOnce(&mut ReputationRecord) -> R) -> R {
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| ReputationRecord::new(Instant::now()));
        f(entry.value_mut())
    }

    fn read<R>(&self, key: &str, f: impl FnOnce(&ReputationRecord) -> R) -> Option<R> {
        self.records.get(key).map(|r| f(r.value()))
    }

    fn keys(&self) -> Vec<String> {
        self.records.iter().map(|e| e.key().clone()).collect()
    }

    fn remove_if(&self, key: &str, pred: impl FnOnce(&ReputationRecord) -> bool) {
        self.records.remove_if(key, |_, record| pred(record));
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Cumulative counters, never reset by cleanup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReputationMetrics {
    pub blocked_attempts: u64,
    pub suspicious_activities: u64,
}

/// Result of a suspicion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspicionOutcome {
    Noted,
    /// This report pushed the source over the threshold.
    NewlyBlocked,
}

pub struct ReputationManager {
    store: RecordStore,
    limits: RateLimitConfig,
    tuning: ReputationConfig,
    blocked_attempts: AtomicU64,
    suspicious_activities: AtomicU64,
    /// Rotation queue for the incremental cleanup sweep.
    sweep_queue: Mutex<VecDeque<String>>,
}

impl ReputationManager {
    pub fn new(limits: RateLimitConfig, tuning: ReputationConfig) -> Self {
        Self {
            store: RecordStore::new(),
            limits,
            tuning,
            blocked_attempts: AtomicU64::new(0),
            suspicious_activities: AtomicU64::new(0),
            sweep_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a sighting of a source at handshake time, creating its record
    /// if this is the first one.
    pub fn track_connection(&self, ip: &str, user_agent: Option<&str>) {
        let now = Instant::now();
        self.store.update(ip, |record| {
            record.last_seen = now;
            if let Some(ua) = user_agent {
                record.user_agent = Some(ua.to_string());
            }
        });
    }

    /// Check-then-increment against the connection window.
    pub fn check_connection_limit(&self, key: &str) -> bool {
        let window = Duration::from_secs(self.limits.connection_window_secs);
        let max = self.limits.connections_per_window;
        let now = Instant::now();
        self.store.update(key, |record| {
            record.last_seen = now;
            record.connections.try_record(now, window, max)
        })
    }

    /// Check-then-increment against the event window. Events carrying a
    /// custom rule get their own window in place of the global one.
    pub fn check_event_limit(
        &self,
        key: &str,
        event: &str,
        rule_override: Option<(u32, Duration)>,
    ) -> bool {
        let now = Instant::now();
        match rule_override {
            Some((max, window)) => self.store.update(key, |record| {
                record.last_seen = now;
                record
                    .custom
                    .entry(event.to_string())
                    .or_default()
                    .try_record(now, window, max)
            }),
            None => {
                let window = Duration::from_secs(self.limits.event_window_secs);
                let max = self.limits.events_per_window;
                self.store.update(key, |record| {
                    record.last_seen = now;
                    record.events.try_record(now, window, max)
                })
            }
        }
    }

    /// Check-then-increment against the chat-message window, which is
    /// budgeted separately (and typically tighter) than generic events.
    pub fn check_message_limit(&self, key: &str) -> bool {
        let window = Duration::from_secs(self.limits.message_window_secs);
        let max = self.limits.messages_per_window;
        let now = Instant::now();
        self.store.update(key, |record| {
            record.last_seen = now;
            record.messages.try_record(now, window, max)
        })
    }

    /// Apply the fixed suspicion increment. Crossing the threshold
    /// transitions the source to blocked.
    pub fn report_suspicious(&self, key: &str) -> SuspicionOutcome {
        self.suspicious_activities.fetch_add(1, Ordering::Relaxed);
        let increment = self.tuning.suspicion_increment;
        let threshold = self.tuning.suspicion_block_threshold;
        let now = Instant::now();
        self.store.update(key, |record| {
            record.last_seen = now;
            record.suspicion_score = record.suspicion_score.saturating_add(increment);
            if record.blocked.is_none() && record.suspicion_score >= threshold {
                record.blocked = Some(BlockInfo {
                    reason: SUSPICION_BLOCK_REASON.to_string(),
                    at_ms: unix_millis(),
                });
                SuspicionOutcome::NewlyBlocked
            } else {
                SuspicionOutcome::Noted
            }
        })
    }

    pub fn block(&self, ip: &str, reason: &str) {
        let now = Instant::now();
        self.store.update(ip, |record| {
            record.last_seen = now;
            record.blocked = Some(BlockInfo {
                reason: reason.to_string(),
                at_ms: unix_millis(),
            });
        });
    }

    /// Clear the block and reset suspicion so the next report starts from a
    /// clean slate instead of immediately re-blocking.
    pub fn unblock(&self, ip: &str) {
        self.store.update(ip, |record| {
            record.blocked = None;
            record.suspicion_score = 0;
        });
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.store
            .read(ip, |record| record.blocked.is_some())
            .unwrap_or(false)
    }

    pub fn blocked_reason(&self, ip: &str) -> Option<String> {
        self.store
            .read(ip, |record| record.blocked.as_ref().map(|b| b.reason.clone()))
            .flatten()
    }

    pub fn suspicion_score(&self, key: &str) -> u32 {
        self.store
            .read(key, |record| record.suspicion_score)
            .unwrap_or(0)
    }

    /// Count an admission attempt from an already-blocked source.
    pub fn record_blocked_attempt(&self) {
        self.blocked_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Incremental sweep: decays suspicion toward zero and expires idle,
    /// unblocked records past the retention horizon. Examines at most
    /// `SWEEP_BATCH` records per call; the rotation queue carries the rest
    /// over to the next tick.
    pub fn cleanup(&self) {
        let decay = self.tuning.suspicion_decay;
        let retention = Duration::from_secs(self.tuning.record_retention_secs);
        let now = Instant::now();

        let batch: Vec<String> = {
            let mut queue = self.sweep_queue.lock().expect("sweep queue poisoned");
            if queue.is_empty() {
                queue.extend(self.store.keys());
            }
            let take = queue.len().min(SWEEP_BATCH);
            queue.drain(..take).collect()
        };

        for key in batch {
            self.store.update(&key, |record| {
                record.suspicion_score = record.suspicion_score.saturating_sub(decay);
                record.connections.prune(
                    now,
                    Duration::from_secs(self.limits.connection_window_secs),
                );
                record
                    .events
                    .prune(now, Duration::from_secs(self.limits.event_window_secs));
                record
                    .messages
                    .prune(now, Duration::from_secs(self.limits.message_window_secs));
                record.custom.retain(|_, w| !w.is_empty());
            });
            self.store
                .remove_if(&key, |record| record.is_expendable(now, retention));
        }
    }

    pub fn metrics(&self) -> ReputationMetrics {
        ReputationMetrics {
            blocked_attempts: self.blocked_attempts.load(Ordering::Relaxed),
            suspicious_activities: self.suspicious_activities.load(Ordering::Relaxed),
        }
    }

    pub fn tracked_sources(&self) -> usize {
        self.store.len()
    }
}
