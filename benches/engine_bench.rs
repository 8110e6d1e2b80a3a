use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prokzee_lib::atoms::types::{MatchReplaceRule, MatchReplaceTarget, MatchType, Relationship, Rule, RuleOperator, Transaction};
use prokzee_lib::engine::match_replace::MatchReplaceEngine;
use prokzee_lib::engine::rules::{RuleContext, RuleEvaluator};
use prokzee_lib::engine::scope::ScopeEvaluator;

fn bench_scope_lookup(c: &mut Criterion) {
    let scope = ScopeEvaluator::new();
    scope.set_in(vec![r".*\.example\.test.*".into()]).unwrap();
    scope.set_out(vec![r".*\.internal\.example\.test.*".into()]).unwrap();

    c.bench_function("scope_is_in_scope", |b| {
        b.iter(|| scope.is_in_scope(black_box("https://api.example.test/v1/ping")))
    });
}

fn bench_rule_evaluation(c: &mut Criterion) {
    let evaluator = RuleEvaluator::from_rules(vec![
        Rule {
            name: "method".into(),
            operator: RuleOperator::Or,
            match_type: MatchType::HttpMethod,
            relationship: Relationship::Matches,
            pattern: "POST".into(),
            enabled: true,
        },
        Rule {
            name: "domain".into(),
            operator: RuleOperator::And,
            match_type: MatchType::Domain,
            relationship: Relationship::Matches,
            pattern: r".*\.example\.test".into(),
            enabled: true,
        },
    ])
    .unwrap();
    let headers = Default::default();

    c.bench_function("rule_evaluate", |b| {
        b.iter(|| {
            let ctx = RuleContext {
                domain: "api.example.test",
                url: "https://api.example.test/submit",
                method: "POST",
                path: "/submit",
                request_headers: &headers,
                request_body: b"",
                response_status: None,
                response_body: None,
            };
            evaluator.evaluate(black_box(&ctx))
        })
    });
}

fn bench_match_replace(c: &mut Criterion) {
    let engine = MatchReplaceEngine::from_rules(vec![MatchReplaceRule {
        name: "redact".into(),
        match_type: MatchReplaceTarget::ResponseBody,
        match_content: r"secret=\w+".into(),
        replace_content: "secret=REDACTED".into(),
        enabled: true,
    }])
    .unwrap();

    c.bench_function("match_replace_apply_response", |b| {
        b.iter(|| {
            let mut tx = Transaction::new("GET", "http://example.test/", "HTTP/1.1");
            tx.response_body = b"prefix secret=abc123 suffix".to_vec();
            engine.apply_response(black_box(&mut tx));
            tx
        })
    });
}

criterion_group!(benches, bench_scope_lookup, bench_rule_evaluation, bench_match_replace);
criterion_main!(benches);
