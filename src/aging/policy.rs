//! Aging policy: which rules are stale enough to retire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::types::{Provenance, Rule};

/// What happens to a selected rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CleanupAction {
    #[default]
    #[serde(rename = "deactivate")]
    Deactivate,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "convert_to_410", alias = "convert_410")]
    ConvertTo410,
}

impl CleanupAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupAction::Deactivate => "deactivate",
            CleanupAction::Delete => "delete",
            CleanupAction::ConvertTo410 => "convert_to_410",
        }
    }
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deactivate" => Ok(CleanupAction::Deactivate),
            "delete" => Ok(CleanupAction::Delete),
            "convert_to_410" | "convert_410" => Ok(CleanupAction::ConvertTo410),
            other => Err(format!(
                "unknown cleanup action '{}': expected deactivate, delete or convert_to_410",
                other
            )),
        }
    }
}

/// Selection thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingPolicy {
    pub min_age_days: u32,
    pub min_idle_days: u32,
    pub excluded_provenance: Vec<Provenance>,
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self {
            min_age_days: 365,
            min_idle_days: 90,
            excluded_provenance: vec![Provenance::Manual],
        }
    }
}

impl AgingPolicy {
    /// A rule is a candidate iff it is active, older than `min_age_days`, not hit
    /// within `min_idle_days`, has no explicit expiry, and its provenance is not
    /// excluded.
    pub fn is_candidate(&self, rule: &Rule, now: DateTime<Utc>) -> bool {
        let age_cutoff = now - Duration::days(i64::from(self.min_age_days));
        let idle_cutoff = now - Duration::days(i64::from(self.min_idle_days));

        rule.is_active
            && rule.created_at < age_cutoff
            && rule.last_hit.map_or(true, |hit| hit < idle_cutoff)
            && rule.expires_at.is_none()
            && !self.excluded_provenance.contains(&rule.provenance)
    }
}

/// Candidates in ascending id order.
pub fn select_candidates(rules: &[Rule], policy: &AgingPolicy, now: DateTime<Utc>) -> Vec<Rule> {
    let mut selected: Vec<Rule> = rules
        .iter()
        .filter(|r| policy.is_candidate(r, now))
        .cloned()
        .collect();
    selected.sort_by_key(|r| r.id);
    selected
}
