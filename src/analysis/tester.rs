//! Dry-run path tester.
//!
//! Runs the same selection, condition and result logic as the live pipeline
//! but reports every intermediate step. Nothing is recorded or mutated.

use serde::Serialize;

use crate::analysis::chains::{trace_chain, ChainStep, MAX_HOPS};
use crate::conditions::RequestContext;
use crate::routing::matcher::{MatchKind, MatchResult, RuleSet};
use crate::rules::types::{Rule, RuleId};

#[derive(Debug, Clone, Serialize)]
pub struct PathTestReport {
    /// Normalized request path.
    pub path: String,
    pub match_kind: Option<MatchKind>,
    pub rule: Option<Rule>,
    pub captures: Vec<String>,
    /// `None` when no rule was selected.
    pub conditions_passed: Option<bool>,
    pub result: MatchResult,
    pub chain: Vec<ChainStep>,
}

impl PathTestReport {
    pub fn rule_id(&self) -> Option<RuleId> {
        self.rule.as_ref().map(|r| r.id)
    }
}

/// Test `ctx.path` against `rules`.
pub fn test_path(rules: &RuleSet, ctx: &RequestContext) -> PathTestReport {
    let all: Vec<Rule> = rules.rules().cloned().collect();
    let chain = trace_chain(&all, &ctx.path, MAX_HOPS);

    let Some(selected) = rules.find(&ctx.path) else {
        return PathTestReport {
            path: ctx.path.clone(),
            match_kind: None,
            rule: None,
            captures: Vec::new(),
            conditions_passed: None,
            result: MatchResult::PassThrough,
            chain,
        };
    };

    let passed = selected.compiled.conditions().all_pass(ctx);
    let result = if passed {
        selected.result(&ctx.path)
    } else {
        MatchResult::PassThrough
    };

    PathTestReport {
        path: ctx.path.clone(),
        match_kind: Some(selected.kind),
        rule: Some(selected.rule().clone()),
        captures: selected.captures.clone(),
        conditions_passed: Some(passed),
        result,
        chain,
    }
}
