//! Rule matching logic.
//!
//! # Responsibilities
//! - Compile the active rule list into an immutable [`RuleSet`]
//! - Exact pass via a map keyed by normalized source
//! - Pattern pass over anchored regular expressions, in id order
//! - Substitute capture groups into the target template
//!
//! # Design Decisions
//! - Exact rules always win over pattern rules; lowest id wins within a group
//! - A pattern that fails to compile is skipped and reported as a [`RuleWarning`]
//! - 410 rules produce `Gone` and never compute a target
//! - A target that normalizes to the request path is suppressed (no self-redirect)

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;

use crate::conditions::ConditionSet;
use crate::observability::metrics;
use crate::rules::normalize::{is_absolute, normalize};
use crate::rules::types::{sort_for_matching, RedirectStatus, Rule, RuleId};

/// What the serving layer should do with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    PassThrough,
    Redirect { target: String, status: RedirectStatus },
    Gone,
}

/// Which pass selected a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Pattern,
}

/// A rule that was accepted but cannot take part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleWarning {
    pub rule_id: RuleId,
    pub source: String,
    pub message: String,
}

/// Compile a pattern source, anchored over the whole normalized path.
pub fn compile_pattern(source: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", source))
}

/// Convert `$N` and `\N` placeholders into the `${N}` form `Regex::expand`
/// understands. Any other `$` is kept literally.
pub fn to_expand_template(target: &str) -> String {
    let chars: Vec<char> = target.chars().collect();
    let mut out = String::with_capacity(target.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if (c == '$' || c == '\\') && i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end].is_ascii_digit() {
                end += 1;
            }
            let group: String = chars[start..end].iter().collect();
            out.push_str(&format!("${{{}}}", group));
            i = end;
            continue;
        }
        if c == '$' && i + 1 < chars.len() && chars[i + 1] == '{' {
            out.push('$');
        } else if c == '$' {
            out.push_str("$$");
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

/// A rule prepared for matching.
#[derive(Debug)]
pub struct CompiledRule {
    pub rule: Rule,
    pattern: Option<Regex>,
    template: String,
    conditions: ConditionSet,
}

impl CompiledRule {
    pub fn conditions(&self) -> &ConditionSet {
        &self.conditions
    }

    pub fn id(&self) -> RuleId {
        self.rule.id
    }
}

/// A rule selected for a path, before conditions are evaluated.
#[derive(Debug)]
pub struct RuleMatch<'a> {
    pub compiled: &'a CompiledRule,
    pub kind: MatchKind,
    /// Capture groups of a pattern match (group 0 excluded).
    pub captures: Vec<String>,
    /// Substituted target; empty for 410 rules.
    pub target: String,
}

impl RuleMatch<'_> {
    pub fn rule(&self) -> &Rule {
        &self.compiled.rule
    }

    /// The outcome for `path` if this rule fires.
    pub fn result(&self, path: &str) -> MatchResult {
        let status = self.compiled.rule.status;
        if status.is_gone() {
            return MatchResult::Gone;
        }
        if self.target.is_empty() || normalize(&self.target) == path {
            return MatchResult::PassThrough;
        }
        MatchResult::Redirect {
            target: self.target.clone(),
            status,
        }
    }
}

/// The compiled active rule set.
///
/// Immutable once built; shared behind an `Arc` by the rule cache.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    exact: HashMap<String, usize>,
    patterns: Vec<usize>,
    warnings: Vec<RuleWarning>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile rules. Ordering is re-established here, so callers may pass
    /// rules in any order.
    pub fn compile(mut rules: Vec<Rule>) -> Self {
        sort_for_matching(&mut rules);

        let mut set = RuleSet::default();
        for rule in rules {
            let idx = set.rules.len();
            let mut pattern = None;
            let mut template = String::new();

            if rule.is_regex {
                match compile_pattern(&rule.source) {
                    Ok(re) => {
                        pattern = Some(re);
                        template = to_expand_template(&rule.target);
                        set.patterns.push(idx);
                    }
                    Err(e) => {
                        tracing::warn!(rule_id = rule.id, source = %rule.source, error = %e, "Skipping rule with invalid pattern");
                        metrics::record_invalid_pattern();
                        set.warnings.push(RuleWarning {
                            rule_id: rule.id,
                            source: rule.source.clone(),
                            message: format!("pattern does not compile: {}", e),
                        });
                    }
                }
            } else {
                set.exact.entry(normalize(&rule.source)).or_insert(idx);
            }

            let conditions = ConditionSet::compile(&rule.conditions);
            set.rules.push(CompiledRule {
                rule,
                pattern,
                template,
                conditions,
            });
        }
        set
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in matching order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn warnings(&self) -> &[RuleWarning] {
        &self.warnings
    }

    /// Select the first applicable rule for a normalized path.
    pub fn find(&self, path: &str) -> Option<RuleMatch<'_>> {
        if let Some(&idx) = self.exact.get(path) {
            let compiled = &self.rules[idx];
            let target = if compiled.rule.status.is_gone() {
                String::new()
            } else {
                compiled.rule.target.clone()
            };
            return Some(RuleMatch {
                compiled,
                kind: MatchKind::Exact,
                captures: Vec::new(),
                target,
            });
        }

        for &idx in &self.patterns {
            let compiled = &self.rules[idx];
            let Some(re) = &compiled.pattern else {
                continue;
            };
            let Some(caps) = re.captures(path) else {
                continue;
            };

            let captures = caps
                .iter()
                .skip(1)
                .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect();
            let mut target = String::new();
            if !compiled.rule.status.is_gone() {
                caps.expand(&compiled.template, &mut target);
                if !is_absolute(&target) && !target.starts_with('/') {
                    target.insert(0, '/');
                }
            }
            return Some(RuleMatch {
                compiled,
                kind: MatchKind::Pattern,
                captures,
                target,
            });
        }

        None
    }

    /// Unconditional match: the outcome if the selected rule's conditions pass.
    pub fn match_path(&self, path: &str) -> MatchResult {
        self.find(path)
            .map_or(MatchResult::PassThrough, |m| m.result(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::Provenance;
    use chrono::Utc;

    fn rule(id: RuleId, source: &str, target: &str, is_regex: bool) -> Rule {
        let now = Utc::now();
        Rule {
            id,
            source: source.to_string(),
            target: target.to_string(),
            status: RedirectStatus::MovedPermanently,
            is_regex,
            is_active: true,
            expires_at: None,
            group: None,
            hit_count: 0,
            last_hit: None,
            provenance: Provenance::Manual,
            note: String::new(),
            conditions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_exact_match() {
        let set = RuleSet::compile(vec![rule(1, "/old", "/new", false)]);
        assert_eq!(
            set.match_path("/old"),
            MatchResult::Redirect {
                target: "/new".into(),
                status: RedirectStatus::MovedPermanently
            }
        );
        assert_eq!(set.match_path("/other"), MatchResult::PassThrough);
    }

    #[test]
    fn test_pattern_match_substitutes_captures() {
        let set = RuleSet::compile(vec![rule(1, "^/blog/(.+)$", "/articles/$1", true)]);
        let m = set.find("/blog/my-post").unwrap();
        assert_eq!(m.kind, MatchKind::Pattern);
        assert_eq!(m.captures, vec!["my-post".to_string()]);
        assert_eq!(
            m.result("/blog/my-post"),
            MatchResult::Redirect {
                target: "/articles/my-post".into(),
                status: RedirectStatus::MovedPermanently
            }
        );
    }

    #[test]
    fn test_patterns_are_anchored() {
        let set = RuleSet::compile(vec![rule(1, "/shop", "/store", true)]);
        assert_eq!(set.match_path("/old/shop/x"), MatchResult::PassThrough);
        assert!(matches!(set.match_path("/shop"), MatchResult::Redirect { .. }));
    }

    #[test]
    fn test_exact_beats_pattern_regardless_of_id() {
        let set = RuleSet::compile(vec![
            rule(1, "^/p/(.*)$", "/pattern/$1", true),
            rule(9, "/p/x", "/exact", false),
        ]);
        assert!(matches!(
            set.match_path("/p/x"),
            MatchResult::Redirect { target, .. } if target == "/exact"
        ));
    }

    #[test]
    fn test_lowest_id_wins() {
        let set = RuleSet::compile(vec![
            rule(5, "^/a/.*$", "/five", true),
            rule(2, "^/a/(b)$", "/two/$1", true),
            rule(7, "/dup", "/seven", false),
            rule(3, "/dup", "/three", false),
        ]);
        assert!(matches!(set.match_path("/a/b"), MatchResult::Redirect { target, .. } if target == "/two/b"));
        assert!(matches!(set.match_path("/dup"), MatchResult::Redirect { target, .. } if target == "/three"));
    }

    #[test]
    fn test_gone_has_no_target() {
        let mut r = rule(1, "/removed", "/ignored", false);
        r.status = RedirectStatus::Gone;
        let set = RuleSet::compile(vec![r]);
        assert_eq!(set.match_path("/removed"), MatchResult::Gone);
        assert!(set.find("/removed").unwrap().target.is_empty());
    }

    #[test]
    fn test_self_redirect_is_suppressed() {
        let set = RuleSet::compile(vec![
            rule(1, "/a", "/a", false),
            rule(2, "^/(b)$", "/$1/", true),
        ]);
        assert_eq!(set.match_path("/a"), MatchResult::PassThrough);
        assert_eq!(set.match_path("/b"), MatchResult::PassThrough);
    }

    #[test]
    fn test_invalid_pattern_is_skipped_with_warning() {
        let set = RuleSet::compile(vec![
            rule(1, "^/broken/(.+$", "/x", true),
            rule(2, "^/broken/(.+)$", "/fixed/$1", true),
        ]);
        assert_eq!(set.warnings().len(), 1);
        assert_eq!(set.warnings()[0].rule_id, 1);
        assert!(matches!(set.match_path("/broken/y"), MatchResult::Redirect { target, .. } if target == "/fixed/y"));
    }

    #[test]
    fn test_absolute_template_targets() {
        let set = RuleSet::compile(vec![rule(1, "^/shop/(.+)$", "https://shop.example.com/$1", true)]);
        assert!(matches!(
            set.match_path("/shop/hat"),
            MatchResult::Redirect { target, .. } if target == "https://shop.example.com/hat"
        ));
    }

    #[test]
    fn test_template_conversion() {
        assert_eq!(to_expand_template("/a/$1/$12"), "/a/${1}/${12}");
        assert_eq!(to_expand_template(r"/a/\1"), "/a/${1}");
        assert_eq!(to_expand_template("/price$"), "/price$$");
        assert_eq!(to_expand_template("/x/${2}"), "/x/${2}");
    }
}
