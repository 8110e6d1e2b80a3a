// Rule Evaluator (spec §4.3).
//
// Decides "should this request be intercepted" via conjunctions/disjunctions
// over typed predicates. Evaluation: seed the accumulator with the first
// enabled rule's predicate result (the first rule's `operator` is ignored —
// see DESIGN.md Open Question decisions); for each subsequent enabled rule,
// combine `predicate XOR (relationship == doesn't match)` into the
// accumulator using that rule's operator. An empty rule set yields false.

use crate::atoms::error::{ProxyError, ProxyResult};
use crate::atoms::types::{HeaderMap, MatchType, Relationship, Rule, RuleOperator};
use parking_lot::RwLock;
use regex::Regex;

/// What the pipeline has on hand when it needs to evaluate rules against a
/// transaction. Response-phase fields are `None` during the request phase.
pub struct RuleContext<'a> {
    pub domain: &'a str,
    pub url: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub request_headers: &'a HeaderMap,
    pub request_body: &'a [u8],
    pub response_status: Option<u16>,
    pub response_body: Option<&'a [u8]>,
}

pub struct RuleEvaluator {
    rules: RwLock<Vec<Rule>>,
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEvaluator {
    pub fn new() -> Self {
        RuleEvaluator { rules: RwLock::new(Vec::new()) }
    }

    pub fn from_rules(rules: Vec<Rule>) -> ProxyResult<Self> {
        for r in &rules {
            validate_pattern(r)?;
        }
        Ok(RuleEvaluator { rules: RwLock::new(rules) })
    }

    pub fn add_rule(&self, rule: Rule) -> ProxyResult<()> {
        validate_pattern(&rule)?;
        self.rules.write().push(rule);
        Ok(())
    }

    pub fn delete_rule(&self, name: &str) {
        self.rules.write().retain(|r| r.name != name);
    }

    pub fn all_rules(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }

    /// Returns true iff this transaction should be intercepted.
    pub fn evaluate(&self, ctx: &RuleContext) -> bool {
        let rules = self.rules.read();
        let mut enabled = rules.iter().filter(|r| r.enabled);

        let first = match enabled.next() {
            Some(r) => r,
            None => return false,
        };
        let mut acc = predicate(first, ctx);

        for rule in enabled {
            let p = predicate(rule, ctx);
            acc = match rule.operator {
                RuleOperator::And => acc && p,
                RuleOperator::Or => acc || p,
            };
        }
        acc
    }
}

fn validate_pattern(rule: &Rule) -> ProxyResult<()> {
    match rule.match_type {
        MatchType::HttpMethod | MatchType::FileExtension | MatchType::StatusCode => Ok(()),
        _ => Regex::new(&rule.pattern).map(|_| ()).map_err(ProxyError::Pattern),
    }
}

/// `predicate XOR (relationship == doesn't match)` for a single rule.
fn predicate(rule: &Rule, ctx: &RuleContext) -> bool {
    let raw = raw_predicate(rule, ctx);
    match rule.relationship {
        Relationship::Matches => raw,
        Relationship::DoesntMatch => !raw,
    }
}

fn raw_predicate(rule: &Rule, ctx: &RuleContext) -> bool {
    match rule.match_type {
        MatchType::Domain => regex_match(&rule.pattern, ctx.domain),
        MatchType::Url => regex_match(&rule.pattern, ctx.url),
        MatchType::HttpMethod => rule.pattern.eq_ignore_ascii_case(ctx.method),
        MatchType::FileExtension => {
            let ext = ctx.path.rsplit('.').next().unwrap_or("");
            ext.eq_ignore_ascii_case(rule.pattern.trim_start_matches('.'))
        }
        MatchType::RequestContains => {
            contains_bytes(ctx.request_body, rule.pattern.as_bytes())
                || ctx.request_headers.iter().any(|(_, v)| v.contains(&rule.pattern))
        }
        MatchType::ResponseContains => match ctx.response_body {
            // A response-only predicate evaluated during the request phase
            // (no response materialized yet) is "unknown" — false.
            Some(body) => contains_bytes(body, rule.pattern.as_bytes()),
            None => false,
        },
        MatchType::StatusCode => match ctx.response_status {
            Some(status) => rule.pattern == status.to_string(),
            None => false,
        },
    }
}

fn regex_match(pattern: &str, haystack: &str) -> bool {
    Regex::new(pattern).map(|r| r.is_match(haystack)).unwrap_or(false)
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(method: &'a str, domain: &'a str, headers: &'a HeaderMap) -> RuleContext<'a> {
        RuleContext {
            domain,
            url: domain,
            method,
            path: "/",
            request_headers: headers,
            request_body: b"",
            response_status: None,
            response_body: None,
        }
    }

    fn rule(name: &str, operator: RuleOperator, match_type: MatchType, pattern: &str) -> Rule {
        Rule {
            name: name.into(),
            operator,
            match_type,
            relationship: Relationship::Matches,
            pattern: pattern.into(),
            enabled: true,
        }
    }

    #[test]
    fn empty_rule_set_yields_false() {
        let eval = RuleEvaluator::new();
        let h = HeaderMap::new();
        assert!(!eval.evaluate(&ctx("GET", "example.test", &h)));
    }

    #[test]
    fn single_rule_first_operator_ignored() {
        let eval = RuleEvaluator::from_rules(vec![rule(
            "r1",
            RuleOperator::Or, // ignored — only rule, seeds the accumulator directly
            MatchType::HttpMethod,
            "POST",
        )])
        .unwrap();
        let h = HeaderMap::new();
        assert!(eval.evaluate(&ctx("POST", "example.test", &h)));
        assert!(!eval.evaluate(&ctx("GET", "example.test", &h)));
    }

    #[test]
    fn and_combination_requires_both() {
        let eval = RuleEvaluator::from_rules(vec![
            rule("method", RuleOperator::Or, MatchType::HttpMethod, "POST"),
            rule("domain", RuleOperator::And, MatchType::Domain, "example"),
        ])
        .unwrap();
        let h = HeaderMap::new();
        assert!(eval.evaluate(&ctx("POST", "example.test", &h)));
        assert!(!eval.evaluate(&ctx("POST", "other.test", &h)));
    }

    #[test]
    fn doesnt_match_inverts_predicate() {
        let mut r = rule("not-get", RuleOperator::Or, MatchType::HttpMethod, "GET");
        r.relationship = Relationship::DoesntMatch;
        let eval = RuleEvaluator::from_rules(vec![r]).unwrap();
        let h = HeaderMap::new();
        assert!(eval.evaluate(&ctx("POST", "example.test", &h)));
        assert!(!eval.evaluate(&ctx("GET", "example.test", &h)));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut r1 = rule("r1", RuleOperator::Or, MatchType::HttpMethod, "POST");
        r1.enabled = false;
        let r2 = rule("r2", RuleOperator::Or, MatchType::Domain, "example");
        let eval = RuleEvaluator::from_rules(vec![r1, r2]).unwrap();
        let h = HeaderMap::new();
        // r1 disabled, so r2 seeds the accumulator directly.
        assert!(eval.evaluate(&ctx("GET", "example.test", &h)));
    }

    #[test]
    fn response_contains_is_false_during_request_phase() {
        let eval = RuleEvaluator::from_rules(vec![rule(
            "resp",
            RuleOperator::Or,
            MatchType::ResponseContains,
            "secret",
        )])
        .unwrap();
        let h = HeaderMap::new();
        assert!(!eval.evaluate(&ctx("GET", "example.test", &h)));
    }
}
