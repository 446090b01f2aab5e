//! Origin allow-list validation.
//!
//! Supports exact entries (`https://watch.example.com`) and wildcard
//! subdomain entries (`https://*.example.com`). Wildcards match same-scheme,
//! same-port subdomains on a `.` boundary only: `https://a.example.com`
//! matches `https://*.example.com`, while `https://notexample.com` and the
//! bare apex `https://example.com` do not.

use url::Url;

/// A parsed wildcard entry: `https://*.example.com`.
#[derive(Debug, Clone)]
struct WildcardEntry {
    scheme: String,
    /// Domain after the `*.` marker, lowercased.
    suffix: String,
    /// Explicit port if the entry carried one.
    port: Option<u16>,
}

/// Validates the `Origin` header of a handshake against the configured
/// allow-list. Rebuilt wholesale whenever the origin configuration changes.
#[derive(Debug, Clone)]
pub struct OriginValidator {
    exact: Vec<String>,
    wildcards: Vec<WildcardEntry>,
    allow_missing: bool,
}

impl OriginValidator {
    pub fn new(allowed: &[String], allow_missing: bool) -> Self {
        let mut exact = Vec::new();
        let mut wildcards = Vec::new();

        for entry in allowed {
            match parse_wildcard(entry) {
                Some(w) => wildcards.push(w),
                None => exact.push(entry.trim_end_matches('/').to_ascii_lowercase()),
            }
        }

        Self {
            exact,
            wildcards,
            allow_missing,
        }
    }

    /// Check a declared origin. An absent origin is a policy decision
    /// (`allow_missing`), not an allow-list lookup.
    pub fn is_valid(&self, origin: Option<&str>) -> bool {
        let origin = match origin {
            Some(o) if !o.is_empty() => o,
            _ => return self.allow_missing,
        };

        let normalized = origin.trim_end_matches('/').to_ascii_lowercase();
        if self.exact.iter().any(|e| *e == normalized) {
            return true;
        }

        if self.wildcards.is_empty() {
            return false;
        }

        let parsed = match Url::parse(&normalized) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let host = match parsed.host_str() {
            Some(h) => h,
            None => return false,
        };

        self.wildcards.iter().any(|w| {
            parsed.scheme() == w.scheme
                && parsed.port() == w.port
                && host.len() > w.suffix.len()
                && host.ends_with(&w.suffix)
                && host.as_bytes()[host.len() - w.suffix.len() - 1] == b'.'
        })
    }
}

fn parse_wildcard(entry: &str) -> Option<WildcardEntry> {
    let marker = "://*.";
    let idx = entry.find(marker)?;
    let scheme = entry[..idx].to_ascii_lowercase();
    let rest = &entry[idx + marker.len()..];
    // Substituting a literal host lets url handle port/path normalization.
    let probe = Url::parse(&format!("{}://{}", scheme, rest)).ok()?;
    let suffix = probe.host_str()?.to_ascii_lowercase();
    if suffix.is_empty() {
        return None;
    }
    Some(WildcardEntry {
        scheme,
        suffix,
        port: probe.port(),
    })
}
