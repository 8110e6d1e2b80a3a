// Match/Replace Engine (spec §4.4).
//
// Applied twice per transaction: once after interception-gate resume
// (pre-upstream) over request-targeted rules, once after the upstream
// response completes over response-targeted rules. Rules apply in
// insertion order; matches found after replacement are not re-scanned
// within the same rule. After any body rewrite, Content-Length is
// recomputed and Transfer-Encoding: chunked is stripped (in that order —
// see DESIGN.md Open Question decisions).

use crate::atoms::error::{ProxyError, ProxyResult};
use crate::atoms::types::{split_url, HeaderMap, MatchReplaceRule, MatchReplaceTarget, Transaction};
use parking_lot::RwLock;
use regex::Regex;

pub struct MatchReplaceEngine {
    rules: RwLock<Vec<MatchReplaceRule>>,
}

impl Default for MatchReplaceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchReplaceEngine {
    pub fn new() -> Self {
        MatchReplaceEngine { rules: RwLock::new(Vec::new()) }
    }

    pub fn from_rules(rules: Vec<MatchReplaceRule>) -> ProxyResult<Self> {
        for r in &rules {
            Regex::new(&r.match_content).map_err(ProxyError::Pattern)?;
        }
        Ok(MatchReplaceEngine { rules: RwLock::new(rules) })
    }

    pub fn add_rule(&self, rule: MatchReplaceRule) -> ProxyResult<()> {
        Regex::new(&rule.match_content).map_err(ProxyError::Pattern)?;
        self.rules.write().push(rule);
        Ok(())
    }

    pub fn delete_rule(&self, name: &str) {
        self.rules.write().retain(|r| r.name != name);
    }

    pub fn update_rule(&self, rule: MatchReplaceRule) -> ProxyResult<()> {
        Regex::new(&rule.match_content).map_err(ProxyError::Pattern)?;
        let mut rules = self.rules.write();
        if let Some(existing) = rules.iter_mut().find(|r| r.name == rule.name) {
            *existing = rule;
        } else {
            rules.push(rule);
        }
        Ok(())
    }

    pub fn all_rules(&self) -> Vec<MatchReplaceRule> {
        self.rules.read().clone()
    }

    /// Apply request-targeted rules (request_header, request_body, request_url) to `tx`.
    pub fn apply_request(&self, tx: &mut Transaction) {
        let rules = self.rules.read();
        for rule in rules.iter().filter(|r| r.enabled) {
            match rule.match_type {
                MatchReplaceTarget::RequestHeader => {
                    apply_to_headers(&mut tx.request_headers, rule);
                }
                MatchReplaceTarget::RequestBody => {
                    if let Some(new_body) = apply_to_bytes(&tx.request_body, rule) {
                        recompute_length(&mut tx.request_headers, new_body.len());
                        tx.request_body = new_body;
                    }
                }
                MatchReplaceTarget::RequestUrl => {
                    if let Some(re) = compile(&rule.match_content) {
                        tx.url = re.replace(&tx.url, rule.replace_content.as_str()).into_owned();
                        let (domain, port, path, query) = split_url(&tx.url);
                        tx.domain = domain;
                        tx.port = port;
                        tx.path = path;
                        tx.query = query;
                    }
                }
                MatchReplaceTarget::ResponseHeader
                | MatchReplaceTarget::ResponseBody
                | MatchReplaceTarget::StatusCode => {}
            }
        }
    }

    /// Apply response-targeted rules (response_header, response_body, status_code) to `tx`.
    pub fn apply_response(&self, tx: &mut Transaction) {
        let rules = self.rules.read();
        for rule in rules.iter().filter(|r| r.enabled) {
            match rule.match_type {
                MatchReplaceTarget::ResponseHeader => {
                    apply_to_headers(&mut tx.response_headers, rule);
                }
                MatchReplaceTarget::ResponseBody => {
                    if let Some(new_body) = apply_to_bytes(&tx.response_body, rule) {
                        recompute_length(&mut tx.response_headers, new_body.len());
                        tx.content_length = Some(new_body.len() as u64);
                        tx.response_body = new_body;
                    }
                }
                MatchReplaceTarget::StatusCode => {
                    if let (Some(re), Some(ref line)) =
                        (compile(&rule.match_content), tx.response_status_line.clone())
                    {
                        tx.response_status_line =
                            Some(re.replace(line, rule.replace_content.as_str()).into_owned());
                    }
                }
                MatchReplaceTarget::RequestHeader
                | MatchReplaceTarget::RequestBody
                | MatchReplaceTarget::RequestUrl => {}
            }
        }
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

fn apply_to_headers(headers: &mut HeaderMap, rule: &MatchReplaceRule) {
    let Some(re) = compile(&rule.match_content) else { return };
    let rewritten: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.clone(), re.replace(v, rule.replace_content.as_str()).into_owned()))
        .collect();
    *headers = HeaderMap::new();
    for (k, v) in rewritten {
        headers.push(k, v);
    }
}

/// Returns `Some(new_bytes)` only if the rule actually matched (avoids
/// pointless Content-Length recomputation on a no-op pass).
fn apply_to_bytes(body: &[u8], rule: &MatchReplaceRule) -> Option<Vec<u8>> {
    let re = compile(&rule.match_content)?;
    let text = String::from_utf8_lossy(body);
    if !re.is_match(&text) {
        return None;
    }
    let replaced = re.replace_all(&text, rule.replace_content.as_str());
    Some(replaced.into_owned().into_bytes())
}

fn recompute_length(headers: &mut HeaderMap, new_len: usize) {
    headers.remove("Transfer-Encoding");
    headers.set("Content-Length", new_len.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mr_rule(match_type: MatchReplaceTarget, pattern: &str, replace: &str) -> MatchReplaceRule {
        MatchReplaceRule {
            name: "r".into(),
            match_type,
            match_content: pattern.into(),
            replace_content: replace.into(),
            enabled: true,
        }
    }

    #[test]
    fn response_body_rewrite_updates_content_length_fixture_scenario_4() {
        let engine = MatchReplaceEngine::from_rules(vec![mr_rule(
            MatchReplaceTarget::ResponseBody,
            r"secret=\w+",
            "secret=REDACTED",
        )])
        .unwrap();
        let mut tx = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
        tx.response_body = b"Set secret=abc123 now".to_vec();
        tx.response_headers.push("Transfer-Encoding", "chunked");
        engine.apply_response(&mut tx);
        assert_eq!(tx.response_body, b"Set secret=REDACTED now");
        assert_eq!(tx.response_headers.get("Content-Length"), Some("20"));
        assert!(tx.response_headers.get("Transfer-Encoding").is_none());
    }

    #[test]
    fn non_matching_rule_leaves_body_untouched() {
        let engine = MatchReplaceEngine::from_rules(vec![mr_rule(
            MatchReplaceTarget::ResponseBody,
            "nomatch",
            "x",
        )])
        .unwrap();
        let mut tx = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
        tx.response_body = b"hello".to_vec();
        engine.apply_response(&mut tx);
        assert_eq!(tx.response_body, b"hello");
        assert!(tx.response_headers.get("Content-Length").is_none());
    }

    #[test]
    fn rules_apply_in_insertion_order_without_rescanning() {
        let engine = MatchReplaceEngine::from_rules(vec![
            mr_rule(MatchReplaceTarget::ResponseBody, "a", "b"),
            mr_rule(MatchReplaceTarget::ResponseBody, "b", "c"),
        ])
        .unwrap();
        let mut tx = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
        tx.response_body = b"a".to_vec();
        engine.apply_response(&mut tx);
        // "a" -> "b" (rule 1), then rule 2 rescans the whole buffer and turns
        // the freshly-written "b" into "c" — this is a *new* pass, not a
        // rescan within the same rule, so it's expected to cascade.
        assert_eq!(tx.response_body, b"c");
    }

    #[test]
    fn request_url_rule_reparses_url() {
        let engine = MatchReplaceEngine::from_rules(vec![mr_rule(
            MatchReplaceTarget::RequestUrl,
            r"http://",
            "https://",
        )])
        .unwrap();
        let mut tx = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
        engine.apply_request(&mut tx);
        assert_eq!(tx.url, "https://example.test/");
        assert_eq!(tx.domain, "example.test");
        assert_eq!(tx.port, 443);
    }

    #[test]
    fn request_url_rule_rewriting_host_updates_domain_and_path() {
        let engine = MatchReplaceEngine::from_rules(vec![mr_rule(
            MatchReplaceTarget::RequestUrl,
            r"old\.test/foo",
            "new.test/bar",
        )])
        .unwrap();
        let mut tx = Transaction::new("GET", "http://old.test/foo", "HTTP/1.1");
        engine.apply_request(&mut tx);
        assert_eq!(tx.url, "http://new.test/bar");
        assert_eq!(tx.domain, "new.test");
        assert_eq!(tx.path, "/bar");
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut rule = mr_rule(MatchReplaceTarget::ResponseBody, "a", "b");
        rule.enabled = false;
        let engine = MatchReplaceEngine::from_rules(vec![rule]).unwrap();
        let mut tx = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
        tx.response_body = b"a".to_vec();
        engine.apply_response(&mut tx);
        assert_eq!(tx.response_body, b"a");
    }
}
