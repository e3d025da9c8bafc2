//! Rule data model.
//!
//! Rules, their attached conditions, and the small value types around them.
//! Everything here derives Serde traits so the JSON store and the admin API
//! share one representation.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Rule identifier.
///
/// Identifiers are assigned in ascending order by the store and double as the
/// tie-breaker for first-match-wins ordering.
pub type RuleId = u64;

/// HTTP status a rule asks the serving layer to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum RedirectStatus {
    MovedPermanently,
    Found,
    SeeOther,
    TemporaryRedirect,
    PermanentRedirect,
    Gone,
}

impl RedirectStatus {
    pub fn code(self) -> u16 {
        match self {
            RedirectStatus::MovedPermanently => 301,
            RedirectStatus::Found => 302,
            RedirectStatus::SeeOther => 303,
            RedirectStatus::TemporaryRedirect => 307,
            RedirectStatus::PermanentRedirect => 308,
            RedirectStatus::Gone => 410,
        }
    }

    pub fn is_gone(self) -> bool {
        self == RedirectStatus::Gone
    }

    /// 301 and 308 responses may be cached by clients for a long time.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            RedirectStatus::MovedPermanently | RedirectStatus::PermanentRedirect
        )
    }
}

impl Default for RedirectStatus {
    fn default() -> Self {
        RedirectStatus::MovedPermanently
    }
}

impl TryFrom<u16> for RedirectStatus {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            301 => Ok(RedirectStatus::MovedPermanently),
            302 => Ok(RedirectStatus::Found),
            303 => Ok(RedirectStatus::SeeOther),
            307 => Ok(RedirectStatus::TemporaryRedirect),
            308 => Ok(RedirectStatus::PermanentRedirect),
            410 => Ok(RedirectStatus::Gone),
            other => Err(format!(
                "unsupported status {}: expected one of 301, 302, 303, 307, 308, 410",
                other
            )),
        }
    }
}

impl From<RedirectStatus> for u16 {
    fn from(status: RedirectStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for RedirectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// How a rule came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provenance {
    /// Created by an operator.
    Manual,
    /// Created automatically when content moved.
    Auto,
    /// Created automatically as a 410 (deleted content or aging conversion).
    Auto410,
    Import,
    Migration,
    Cli,
    Other(String),
}

impl Provenance {
    pub fn as_str(&self) -> &str {
        match self {
            Provenance::Manual => "manual",
            Provenance::Auto => "auto",
            Provenance::Auto410 => "auto_410",
            Provenance::Import => "import",
            Provenance::Migration => "migration",
            Provenance::Cli => "cli",
            Provenance::Other(tag) => tag,
        }
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Provenance::Manual
    }
}

impl From<String> for Provenance {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "manual" => Provenance::Manual,
            "auto" => Provenance::Auto,
            "auto_410" => Provenance::Auto410,
            "import" => Provenance::Import,
            "migration" => Provenance::Migration,
            "cli" => Provenance::Cli,
            _ => Provenance::Other(tag),
        }
    }
}

impl From<&str> for Provenance {
    fn from(tag: &str) -> Self {
        Provenance::from(tag.to_string())
    }
}

impl From<Provenance> for String {
    fn from(p: Provenance) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored condition attached to a rule.
///
/// `kind` is kept as a free string so that rules carrying a condition type this
/// build does not know about still load; such conditions never pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    pub value: String,
}

fn default_operator() -> String {
    "equals".to_string()
}

impl Condition {
    pub fn new(
        kind: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// A stored rewrite rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    /// Normalized literal path, or a regular expression when `is_regex` is set.
    pub source: String,
    /// Literal path, absolute URL, or capture template. Empty for 410 rules.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub status: RedirectStatus,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub last_hit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Whether the rule takes part in matching at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |at| at > now)
    }

    /// Append a line to the free-text note.
    pub fn append_note(&mut self, line: &str) {
        if !self.note.is_empty() {
            self.note.push('\n');
        }
        self.note.push_str(line);
    }
}

/// Ordering used everywhere a rule list is handed to the matcher:
/// exact rules before pattern rules, ascending identifier within each group.
pub fn sort_for_matching(rules: &mut [Rule]) {
    rules.sort_by_key(|r| (r.is_regex, r.id));
}

/// Fields accepted when creating or updating a rule.
///
/// `id: None` creates a new rule; `Some(id)` updates an existing one while
/// keeping its creation time and usage counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleDraft {
    pub id: Option<RuleId>,
    pub source: String,
    pub target: String,
    pub status: RedirectStatus,
    pub is_regex: bool,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
    pub group: Option<String>,
    pub provenance: Provenance,
    pub note: String,
    pub conditions: Vec<Condition>,
}

impl RuleDraft {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn regex(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            is_regex: true,
            ..Self::new(source, target)
        }
    }

    pub fn gone(source: impl Into<String>) -> Self {
        Self {
            status: RedirectStatus::Gone,
            ..Self::new(source, "")
        }
    }

    pub fn with_status(mut self, status: RedirectStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_expiry(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = Some(false);
        self
    }
}

/// A single change inside a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleMutation {
    SetTarget { id: RuleId, target: String },
    Deactivate { id: RuleId, note: String },
    ConvertToGone { id: RuleId, note: String },
    Delete { id: RuleId },
}

impl RuleMutation {
    pub fn id(&self) -> RuleId {
        match self {
            RuleMutation::SetTarget { id, .. }
            | RuleMutation::Deactivate { id, .. }
            | RuleMutation::ConvertToGone { id, .. }
            | RuleMutation::Delete { id } => *id,
        }
    }
}

/// Accumulated usage for one rule on one day, flushed from the hit tracker
/// into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitDelta {
    pub id: RuleId,
    /// UTC day the hits fell on.
    pub day: NaiveDate,
    pub count: u64,
    pub last_hit: DateTime<Utc>,
}

/// Hits on one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyHits {
    pub date: NaiveDate,
    pub hits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip_through_serde() {
        let json = serde_json::to_string(&RedirectStatus::PermanentRedirect).unwrap();
        assert_eq!(json, "308");

        let parsed: RedirectStatus = serde_json::from_str("410").unwrap();
        assert!(parsed.is_gone());

        assert!(serde_json::from_str::<RedirectStatus>("404").is_err());
    }

    #[test]
    fn test_provenance_tags() {
        assert_eq!(Provenance::from("auto_410"), Provenance::Auto410);
        assert_eq!(Provenance::from("MANUAL"), Provenance::Manual);
        assert_eq!(
            Provenance::from("wordpress-import"),
            Provenance::Other("wordpress-import".to_string())
        );
        assert_eq!(Provenance::Auto410.to_string(), "auto_410");
    }

    #[test]
    fn test_matching_order() {
        let now = Utc::now();
        let mk = |id, is_regex| Rule {
            id,
            source: format!("/r{}", id),
            target: "/t".into(),
            status: RedirectStatus::Found,
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
        };
        let mut rules = vec![mk(4, true), mk(3, false), mk(1, true), mk(2, false)];
        sort_for_matching(&mut rules);
        let ids: Vec<_> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }
}
