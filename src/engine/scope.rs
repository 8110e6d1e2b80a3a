// Scope Evaluator (spec §4.2).
//
// Decides in/out-of-scope for a URL against ordered regex lists. Compilation
// is eager; malformed patterns are rejected at set time and the previous
// list is retained. All mutations are serialized behind a writer lock;
// readers take a shared snapshot (teacher idiom: short critical sections,
// see `engine/state.rs`'s `Mutex<EngineConfig>` pattern).

use crate::atoms::error::{ProxyError, ProxyResult};
use crate::atoms::types::{ScopeList, ScopeListSpec};
use parking_lot::RwLock;
use regex::Regex;

pub struct ScopeEvaluator {
    inner: RwLock<ScopeList>,
}

impl Default for ScopeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeEvaluator {
    pub fn new() -> Self {
        ScopeEvaluator { inner: RwLock::new(ScopeList::default()) }
    }

    pub fn from_spec(spec: &ScopeListSpec) -> ProxyResult<Self> {
        let eval = Self::new();
        eval.set_in(spec.in_patterns.clone())?;
        eval.set_out(spec.out_patterns.clone())?;
        Ok(eval)
    }

    /// A URL is in scope iff it matches at least one `in` pattern AND no
    /// `out` pattern. An empty `in` list is permissive.
    pub fn is_in_scope(&self, url: &str) -> bool {
        let list = self.inner.read();
        let in_ok = list.in_patterns.is_empty() || list.in_patterns.iter().any(|r| r.is_match(url));
        let out_ok = !list.out_patterns.iter().any(|r| r.is_match(url));
        in_ok && out_ok
    }

    pub fn set_in(&self, patterns: Vec<String>) -> ProxyResult<()> {
        let compiled = compile_all(&patterns)?;
        self.inner.write().in_patterns = compiled;
        Ok(())
    }

    pub fn set_out(&self, patterns: Vec<String>) -> ProxyResult<()> {
        let compiled = compile_all(&patterns)?;
        self.inner.write().out_patterns = compiled;
        Ok(())
    }

    pub fn add_in(&self, pattern: &str) -> ProxyResult<()> {
        let re = Regex::new(pattern).map_err(ProxyError::Pattern)?;
        self.inner.write().in_patterns.push(re);
        Ok(())
    }

    pub fn add_out(&self, pattern: &str) -> ProxyResult<()> {
        let re = Regex::new(pattern).map_err(ProxyError::Pattern)?;
        self.inner.write().out_patterns.push(re);
        Ok(())
    }

    /// Snapshot as a serializable spec, for the UI command surface.
    pub fn to_spec(&self) -> ScopeListSpec {
        let list = self.inner.read();
        ScopeListSpec {
            in_patterns: list.in_patterns.iter().map(|r| r.as_str().to_string()).collect(),
            out_patterns: list.out_patterns.iter().map(|r| r.as_str().to_string()).collect(),
        }
    }
}

fn compile_all(patterns: &[String]) -> ProxyResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(ProxyError::Pattern))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_in_list_is_permissive() {
        let eval = ScopeEvaluator::new();
        assert!(eval.is_in_scope("https://anything.example/"));
    }

    #[test]
    fn out_list_excludes_even_without_in_list() {
        let eval = ScopeEvaluator::new();
        eval.add_out(r".*\.internal\.example\.test.*").unwrap();
        assert!(!eval.is_in_scope("https://a.internal.example.test/"));
        assert!(eval.is_in_scope("https://a.example.test/"));
    }

    #[test]
    fn scope_exclusion_fixture_scenario_5() {
        let eval = ScopeEvaluator::new();
        eval.set_in(vec![r".*example\.test.*".into()]).unwrap();
        eval.set_out(vec![r".*\.internal\.example\.test.*".into()]).unwrap();
        assert!(!eval.is_in_scope("https://a.internal.example.test/"));
        assert!(eval.is_in_scope("https://api.example.test/"));
    }

    #[test]
    fn malformed_pattern_retains_previous_list() {
        let eval = ScopeEvaluator::new();
        eval.set_in(vec![r"good".into()]).unwrap();
        assert!(eval.set_in(vec![r"(unterminated".into()]).is_err());
        // previous `good` list is untouched since set_in failed before writing
        let spec = eval.to_spec();
        assert_eq!(spec.in_patterns, vec!["good".to_string()]);
    }

    #[test]
    fn is_in_scope_is_pure_function_of_lists_and_url() {
        let a = ScopeEvaluator::new();
        let b = ScopeEvaluator::new();
        a.set_in(vec!["example".into()]).unwrap();
        b.set_in(vec!["example".into()]).unwrap();
        assert_eq!(a.is_in_scope("http://example/"), b.is_in_scope("http://example/"));
    }
}
