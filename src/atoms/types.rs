// ── Proxy Atoms: Data Model ─────────────────────────────────────────────────
// Pure types shared across engine/ and commands/. Mirrors §3 of the spec.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ── Transaction ──────────────────────────────────────────────────────────

/// A case-insensitive, order-preserving multimap of header name → values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order (e.g. multiple Set-Cookie).
    pub fn get_all<'a>(&'a self, name: &str) -> Vec<&'a str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Remove all instances of `name` then push a single new value — the
    /// shape needed after recomputing Content-Length or stripping
    /// Transfer-Encoding.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.push(name, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The record of one request/response pair processed by the proxy (§3 Transaction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique for the process lifetime (UUIDv7 — monotonic, timestamp-ordered).
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub method: String,
    pub url: String,
    pub protocol: String,
    pub domain: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub request_headers: HeaderMap,
    pub request_body: Vec<u8>,
    pub response_status_line: Option<String>,
    pub response_headers: HeaderMap,
    pub response_body: Vec<u8>,
    pub content_length: Option<u64>,
    pub mime_type: Option<String>,
    pub truncated: bool,
    pub client_aborted: bool,
    pub drop_reason: Option<DropReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    User,
    Timeout,
}

impl Transaction {
    pub fn new(method: impl Into<String>, url: impl Into<String>, protocol: impl Into<String>) -> Self {
        let url = url.into();
        let (domain, port, path, query) = split_url(&url);
        Transaction {
            id: Uuid::now_v7(),
            created_at: chrono::Utc::now(),
            method: method.into(),
            url,
            protocol: protocol.into(),
            domain,
            port,
            path,
            query,
            request_headers: HeaderMap::new(),
            request_body: Vec::new(),
            response_status_line: None,
            response_headers: HeaderMap::new(),
            response_body: Vec::new(),
            content_length: None,
            mime_type: None,
            truncated: false,
            client_aborted: false,
            drop_reason: None,
        }
    }
}

/// Best-effort split of an absolute URL into (host, port, path, query).
/// Falls back to empty components on malformed input — the pipeline never
/// fails a request over an unparsable URL, it just records what it has.
pub(crate) fn split_url(url: &str) -> (String, u16, String, String) {
    match url::Url::parse(url) {
        Ok(u) => {
            let scheme_port = if u.scheme() == "https" { 443 } else { 80 };
            (
                u.host_str().unwrap_or_default().to_string(),
                u.port().unwrap_or(scheme_port),
                u.path().to_string(),
                u.query().unwrap_or_default().to_string(),
            )
        }
        Err(_) => (String::new(), 0, String::new(), String::new()),
    }
}

// ── ScopeList ────────────────────────────────────────────────────────────

/// Two ordered sequences of compiled regular expressions tagged `in` / `out` (§3 ScopeList).
#[derive(Clone, Default)]
pub struct ScopeList {
    pub in_patterns: Vec<regex::Regex>,
    pub out_patterns: Vec<regex::Regex>,
}

/// Serializable snapshot of a `ScopeList` (raw patterns, not compiled regexes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeListSpec {
    pub in_patterns: Vec<String>,
    pub out_patterns: Vec<String>,
}

// ── Rule (interception predicate, §3 Rule) ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    Domain,
    Url,
    HttpMethod,
    FileExtension,
    RequestContains,
    ResponseContains,
    StatusCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    Matches,
    DoesntMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub operator: RuleOperator,
    pub match_type: MatchType,
    pub relationship: Relationship,
    pub pattern: String,
    pub enabled: bool,
}

// ── MatchReplaceRule (§3) ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReplaceTarget {
    RequestHeader,
    RequestBody,
    ResponseHeader,
    ResponseBody,
    RequestUrl,
    StatusCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReplaceRule {
    pub name: String,
    pub match_type: MatchReplaceTarget,
    pub match_content: String,
    pub replace_content: String,
    pub enabled: bool,
}

// ── ApprovalResponse (§3) ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub method: String,
    pub protocol: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

// ── InteractshIdentity (§3) ──────────────────────────────────────────────

#[derive(Clone)]
pub struct InteractshIdentity {
    pub correlation_id: String,
    pub secret_key: String,
    pub subdomain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractshInteraction {
    pub protocol: String,
    pub unique_id: String,
    pub full_id: String,
    pub raw_request: Option<String>,
    pub remote_address: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

// ── FuzzerTab / ResenderTab (boundary structures, §3) ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PayloadSource {
    Sequence { from: i64, to: i64, step: i64 },
    List(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzerTab {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub headers: HeaderMap,
    /// Body template containing `[__Inject-Here__[N]]` placeholders.
    pub body_template: String,
    pub payload_sources: Vec<PayloadSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzerResult {
    pub payload_tuple: Vec<String>,
    pub status: u16,
    pub length: u64,
    pub content_type: Option<String>,
    pub response_headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub raw_status_line: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResenderTab {
    pub id: String,
    pub name: String,
    pub request_ids: Vec<Uuid>,
    pub cursor: usize,
}

// ── ProxyConfig (ambient, SPEC_FULL §3) ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub bind_address: String,
    pub port: u16,
    pub interception_enabled: bool,
    pub interactsh_server_url: String,
    pub fuzzer_workers: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            bind_address: "127.0.0.1".into(),
            port: 8181,
            interception_enabled: false,
            interactsh_server_url: "https://interact.sh".into(),
            fuzzer_workers: crate::atoms::constants::FUZZER_DEFAULT_WORKERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_case_insensitive_lookup() {
        let mut h = HeaderMap::new();
        h.push("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
    }

    #[test]
    fn header_map_preserves_multi_values() {
        let mut h = HeaderMap::new();
        h.push("Set-Cookie", "a=1");
        h.push("Set-Cookie", "b=2");
        assert_eq!(h.get_all("set-cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn header_map_set_replaces_all_prior_values() {
        let mut h = HeaderMap::new();
        h.push("Content-Length", "10");
        h.push("Content-Length", "20");
        h.set("Content-Length", "5");
        assert_eq!(h.get_all("content-length"), vec!["5"]);
    }

    #[test]
    fn transaction_splits_url_components() {
        let tx = Transaction::new("GET", "https://api.test:8443/v1/ping?x=1", "HTTP/1.1");
        assert_eq!(tx.domain, "api.test");
        assert_eq!(tx.port, 8443);
        assert_eq!(tx.path, "/v1/ping");
        assert_eq!(tx.query, "x=1");
    }

    #[test]
    fn transaction_ids_are_unique() {
        let a = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
        let b = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
        assert_ne!(a.id, b.id);
    }
}
