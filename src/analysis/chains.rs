//! Redirect chain and loop analysis.
//!
//! # Responsibilities
//! - Find multi-hop chains and loops among exact rules
//! - Trace a single URL through the exact rules
//! - Collapse chains so every hop points at the final destination
//!
//! # Design Decisions
//! - Only active, exact, non-410 rules take part; pattern targets are templates
//!   and 410 rules have no destination
//! - When several rules share a source the lowest id wins, as in matching
//! - At most [`MAX_HOPS`] hops are reported per chain; longer chains are
//!   still followed to their end so fixes and loop detection see all of it
//! - Loops are reported but never rewritten

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::observability::metrics;
use crate::rules::manager::RuleManager;
use crate::rules::normalize::normalize;
use crate::rules::store::StoreResult;
use crate::rules::types::{RedirectStatus, Rule, RuleId, RuleMutation};

/// Upper bound on hops followed from any starting rule.
pub const MAX_HOPS: usize = 10;

/// One rule along a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStep {
    pub rule_id: RuleId,
    pub source: String,
    pub target: String,
    pub status: RedirectStatus,
}

impl ChainStep {
    fn from_rule(rule: &Rule) -> Self {
        Self {
            rule_id: rule.id,
            source: normalize(&rule.source),
            target: rule.target.clone(),
            status: rule.status,
        }
    }
}

/// A sequence of exact rules where each target is the next rule's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    pub start: String,
    /// Reported hops, at most [`MAX_HOPS`].
    pub steps: Vec<ChainStep>,
    /// URLs the chain passes through, counting its destination: `/a → /b → /c`
    /// has length 3. For loops, the number of distinct sources.
    pub length: usize,
    pub is_loop: bool,
    /// The chain has more hops than [`MAX_HOPS`]; only the first are reported.
    pub truncated: bool,
    /// Where the last hop lands. `None` for loops.
    pub destination: Option<String>,
    /// Hops past [`MAX_HOPS`], kept so a fix rewrites the whole chain.
    #[serde(skip)]
    overflow: Vec<ChainStep>,
}

impl Chain {
    /// Number of rules (hops) in the chain, including unreported ones.
    pub fn len(&self) -> usize {
        self.steps.len() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Destination of the last hop. `None` for loops.
    pub fn final_target(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Every hop, reported or not.
    pub fn all_steps(&self) -> impl Iterator<Item = &ChainStep> {
        self.steps.iter().chain(self.overflow.iter())
    }
}

/// Summary of a chain fix run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainFixReport {
    pub chains_found: usize,
    pub loops_skipped: usize,
    pub rules_updated: usize,
}

/// Normalized source → rule, for the rules that take part in chains.
fn source_map(rules: &[Rule]) -> (Vec<&Rule>, HashMap<String, &Rule>) {
    let mut eligible: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.is_active && !r.is_regex && !r.status.is_gone())
        .collect();
    eligible.sort_by_key(|r| r.id);

    let mut map = HashMap::with_capacity(eligible.len());
    let mut winners = Vec::with_capacity(eligible.len());
    for rule in eligible {
        if let std::collections::hash_map::Entry::Vacant(slot) = map.entry(normalize(&rule.source)) {
            slot.insert(rule);
            winners.push(rule);
        }
    }
    (winners, map)
}

/// Every chain of two or more hops, and every loop.
pub fn find_all_chains(rules: &[Rule]) -> Vec<Chain> {
    let (ordered, map) = source_map(rules);
    let mut consumed: HashSet<String> = HashSet::new();
    let mut chains = Vec::new();

    for rule in ordered {
        let start = normalize(&rule.source);
        if consumed.contains(&start) {
            continue;
        }
        if !map.contains_key(&normalize(&rule.target)) {
            continue;
        }

        // Walk to the real end of the chain or back into a visited source. The
        // walk is bounded by the number of eligible rules.
        let mut steps = Vec::new();
        let mut seen = HashSet::new();
        let mut current = start.clone();
        let mut is_loop = false;

        while let Some(step) = map.get(&current) {
            if !seen.insert(current.clone()) {
                is_loop = true;
                break;
            }
            consumed.insert(current.clone());
            steps.push(ChainStep::from_rule(step));
            current = normalize(&step.target);
        }

        if steps.len() > 1 || is_loop {
            let destination = if is_loop {
                None
            } else {
                steps.last().map(|s| s.target.clone())
            };
            let length = if is_loop { steps.len() } else { steps.len() + 1 };
            let overflow = if steps.len() > MAX_HOPS {
                steps.split_off(MAX_HOPS)
            } else {
                Vec::new()
            };

            chains.push(Chain {
                start,
                truncated: !overflow.is_empty(),
                steps,
                length,
                is_loop,
                destination,
                overflow,
            });
        }
    }
    chains
}

/// The loop-flagged subset of [`find_all_chains`].
pub fn find_loops(rules: &[Rule]) -> Vec<Chain> {
    find_all_chains(rules)
        .into_iter()
        .filter(|c| c.is_loop)
        .collect()
}

/// Follow exact rules from `url`, stopping at the end of the chain, at a loop,
/// or after `max_depth` hops.
pub fn trace_chain(rules: &[Rule], url: &str, max_depth: usize) -> Vec<ChainStep> {
    let (_, map) = source_map(rules);
    let mut steps = Vec::new();
    let mut seen = HashSet::new();
    let mut current = normalize(url);

    while steps.len() < max_depth {
        let Some(rule) = map.get(&current) else {
            break;
        };
        if !seen.insert(current.clone()) {
            break;
        }
        steps.push(ChainStep::from_rule(rule));
        current = normalize(&rule.target);
    }
    steps
}

/// Target rewrites that collapse every non-loop chain onto its final target.
/// Each rule appears at most once.
pub fn plan_chain_fixes(chains: &[Chain]) -> Vec<RuleMutation> {
    let mut planned: HashSet<RuleId> = HashSet::new();
    let mut mutations = Vec::new();

    for chain in chains {
        let Some(final_target) = chain.final_target() else {
            continue;
        };
        let hops = chain.len();
        if hops < 2 {
            continue;
        }
        for step in chain.all_steps().take(hops - 1) {
            if step.target != final_target && planned.insert(step.rule_id) {
                mutations.push(RuleMutation::SetTarget {
                    id: step.rule_id,
                    target: final_target.to_string(),
                });
            }
        }
    }
    mutations
}

/// Collapse all chains in the store. One batch write, one cache invalidation;
/// nothing is written when there is nothing to fix.
pub fn fix_chains(manager: &RuleManager) -> StoreResult<ChainFixReport> {
    let rules = manager.store().load_active_rules(chrono::Utc::now())?;
    let chains = find_all_chains(&rules);
    let mutations = plan_chain_fixes(&chains);

    let report = ChainFixReport {
        chains_found: chains.len(),
        loops_skipped: chains.iter().filter(|c| c.is_loop).count(),
        rules_updated: manager.apply_batch(&mutations)?.len(),
    };

    metrics::record_chain_fixes(report.rules_updated);
    tracing::info!(
        chains = report.chains_found,
        loops = report.loops_skipped,
        updated = report.rules_updated,
        "Chain fix completed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::Provenance;
    use chrono::Utc;

    fn rule(id: RuleId, source: &str, target: &str) -> Rule {
        let now = Utc::now();
        Rule {
            id,
            source: source.to_string(),
            target: target.to_string(),
            status: RedirectStatus::MovedPermanently,
            is_regex: false,
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

    fn apply(rules: &mut [Rule], mutations: &[RuleMutation]) {
        for m in mutations {
            if let RuleMutation::SetTarget { id, target } = m {
                if let Some(r) = rules.iter_mut().find(|r| r.id == *id) {
                    r.target = target.clone();
                }
            }
        }
    }

    #[test]
    fn test_single_hop_is_not_a_chain() {
        assert!(find_all_chains(&[rule(1, "/a", "/b")]).is_empty());
    }

    #[test]
    fn test_two_hop_chain() {
        let rules = vec![rule(1, "/a", "/b"), rule(2, "/b", "/c")];
        let chains = find_all_chains(&rules);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].start, "/a");
        assert_eq!(chains[0].len(), 2);
        assert_eq!(chains[0].length, 3);
        assert!(!chains[0].is_loop);
        assert_eq!(chains[0].final_target(), Some("/c"));
    }

    #[test]
    fn test_fix_is_idempotent() {
        let mut rules = vec![
            rule(1, "/a", "/b"),
            rule(2, "/b", "/c/"),
            rule(3, "/c", "/d"),
            rule(4, "/x", "/b"),
        ];
        let mutations = plan_chain_fixes(&find_all_chains(&rules));
        apply(&mut rules, &mutations);

        assert!(rules.iter().take(3).all(|r| r.target == "/d"));
        assert_eq!(rules[3].target, "/d");
        assert!(find_all_chains(&rules).is_empty());
        assert!(plan_chain_fixes(&find_all_chains(&rules)).is_empty());
    }

    #[test]
    fn test_overlapping_chains_update_each_rule_once() {
        // /b has the lowest id, so /b -> /c -> /d is traced before /a joins it.
        let rules = vec![rule(1, "/b", "/c"), rule(2, "/c", "/d"), rule(3, "/a", "/b")];
        let chains = find_all_chains(&rules);
        assert_eq!(chains.len(), 2);

        let mutations = plan_chain_fixes(&chains);
        let ids: Vec<RuleId> = mutations.iter().map(|m| m.id()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&1) && ids.contains(&3));
    }

    #[test]
    fn test_loop_is_reported_and_left_alone() {
        let rules = vec![rule(1, "/a", "/b"), rule(2, "/b", "/a")];
        let loops = find_loops(&rules);
        assert_eq!(loops.len(), 1);
        assert!(loops[0].is_loop);
        let ids: Vec<RuleId> = loops[0].steps.iter().map(|s| s.rule_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(plan_chain_fixes(&loops).is_empty());
    }

    #[test]
    fn test_regex_and_gone_rules_are_ignored() {
        let mut pattern = rule(2, "/b", "/c");
        pattern.is_regex = true;
        let mut gone = rule(3, "/b", "");
        gone.status = RedirectStatus::Gone;
        assert!(find_all_chains(&[rule(1, "/a", "/b"), pattern, gone]).is_empty());
    }

    #[test]
    fn test_long_chain_is_reported_truncated_and_fixed_whole() {
        let mut rules: Vec<Rule> = (0..15)
            .map(|i| rule(i + 1, &format!("/p{}", i), &format!("/p{}", i + 1)))
            .collect();
        let chains = find_all_chains(&rules);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].steps.len(), MAX_HOPS);
        assert_eq!(chains[0].len(), 15);
        assert_eq!(chains[0].length, 16);
        assert!(chains[0].truncated);
        assert_eq!(chains[0].final_target(), Some("/p15"));

        apply(&mut rules, &plan_chain_fixes(&chains));
        assert!(rules.iter().all(|r| r.target == "/p15"));
        assert!(find_all_chains(&rules).is_empty());
    }

    #[test]
    fn test_long_cycle_is_a_loop() {
        let mut rules: Vec<Rule> = (0..12)
            .map(|i| rule(i + 1, &format!("/q{}", i), &format!("/q{}", (i + 1) % 12)))
            .collect();
        rules.push(rule(13, "/entry", "/q5"));

        let chains = find_all_chains(&rules);
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().all(|c| c.is_loop && c.final_target().is_none()));
        assert_eq!(chains[0].length, 12);
        assert_eq!(find_loops(&rules).len(), 2);
        assert!(plan_chain_fixes(&chains).is_empty());
    }

    #[test]
    fn test_trace_chain() {
        let rules = vec![rule(1, "/a", "/b"), rule(2, "/b", "/a"), rule(3, "/m", "/n")];
        let steps = trace_chain(&rules, "/A/", MAX_HOPS);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].target, "/b");
        assert_eq!(trace_chain(&rules, "/m", MAX_HOPS).len(), 1);
        assert!(trace_chain(&rules, "/nowhere", MAX_HOPS).is_empty());
        assert_eq!(trace_chain(&rules, "/a", 1).len(), 1);
    }
}
