//! Duplicate source detection.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::rules::normalize::normalize;
use crate::rules::types::{Rule, RuleId};

/// Rules that compete for the same source. Only the lowest id ever matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub source: String,
    pub is_regex: bool,
    pub ids: Vec<RuleId>,
    pub targets: Vec<String>,
}

impl DuplicateGroup {
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

/// Group all stored rules (active or not) by source. Exact sources are
/// compared normalized, patterns verbatim.
pub fn find_duplicates(rules: &[Rule]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<(bool, String), Vec<&Rule>> = BTreeMap::new();
    for rule in rules {
        let key = if rule.is_regex {
            rule.source.clone()
        } else {
            normalize(&rule.source)
        };
        groups.entry((rule.is_regex, key)).or_default().push(rule);
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|((is_regex, source), mut members)| {
            members.sort_by_key(|r| r.id);
            DuplicateGroup {
                source,
                is_regex,
                ids: members.iter().map(|r| r.id).collect(),
                targets: members.iter().map(|r| r.target.clone()).collect(),
            }
        })
        .collect()
}
