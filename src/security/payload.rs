//! Event payload validation: type allow-list, authentication requirements,
//! size caps, and chat-text sanitization.
//!
//! The allow-list is default-deny: an event name without a configured rule
//! is rejected outright. Built wholesale from the configured rules and
//! limits; rebuilt on config replacement.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::config::{EventRuleConfig, LimitsConfig};

/// Field chat events carry their human-readable text in.
pub const MESSAGE_FIELD: &str = "message";

#[derive(Debug, Clone)]
pub struct EventRule {
    pub requires_auth: bool,
    pub carries_message: bool,
    /// Custom (max, window) budget replacing the global event window.
    pub rate_override: Option<(u32, Duration)>,
}

pub struct PayloadValidator {
    rules: HashMap<String, EventRule>,
    max_payload_bytes: usize,
    max_message_chars: usize,
}

impl PayloadValidator {
    pub fn new(event_rules: &[EventRuleConfig], limits: &LimitsConfig) -> Self {
        let rules = event_rules
            .iter()
            .map(|r| {
                let rate_override = match (r.max_per_window, r.window_secs) {
                    (Some(max), Some(secs)) => Some((max, Duration::from_secs(secs))),
                    _ => None,
                };
                (
                    r.event.clone(),
                    EventRule {
                        requires_auth: r.requires_auth,
                        carries_message: r.carries_message,
                        rate_override,
                    },
                )
            })
            .collect();

        Self {
            rules,
            max_payload_bytes: limits.max_payload_bytes,
            max_message_chars: limits.max_message_chars,
        }
    }

    /// Default-deny allow-list lookup.
    pub fn validate_event_type(&self, event: &str) -> bool {
        self.rules.contains_key(event)
    }

    pub fn requires_authentication(&self, event: &str) -> bool {
        self.rules.get(event).map(|r| r.requires_auth).unwrap_or(false)
    }

    pub fn rule(&self, event: &str) -> Option<&EventRule> {
        self.rules.get(event)
    }

    /// Measured serialized size against the payload cap. Returns the
    /// measured size on failure for audit metadata.
    pub fn validate_payload_size(&self, data: &Value) -> Result<(), usize> {
        let size = serde_json::to_vec(data).map(|v| v.len()).unwrap_or(0);
        if size > self.max_payload_bytes {
            Err(size)
        } else {
            Ok(())
        }
    }

    /// Character-count cap for human-readable chat text.
    pub fn validate_message_length(&self, content: &str) -> bool {
        content.chars().count() <= self.max_message_chars
    }

    /// Strip injection-risk characters: `<`, `>`, and control characters
    /// other than newline and tab. Removing (rather than entity-escaping)
    /// keeps the function idempotent: the output contains none of the
    /// characters the filter acts on.
    pub fn sanitize_message<'a>(&self, content: &'a str) -> Cow<'a, str> {
        if content.chars().all(is_clean) {
            return Cow::Borrowed(content);
        }
        Cow::Owned(content.chars().filter(|c| is_clean(*c)).collect())
    }
}

fn is_clean(c: char) -> bool {
    if c == '<' || c == '>' {
        return false;
    }
    !c.is_control() || c == '\n' || c == '\t'
}
