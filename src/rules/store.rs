//! Rule persistence.
//!
//! [`RuleStore`] is the boundary the core consumes; [`JsonRuleStore`] is the
//! implementation shipped with the server: an in-memory ordered map that is
//! optionally mirrored to a JSON file after every successful write.
//!
//! Writes are copy-on-write: a mutation is applied to a clone of the map, the
//! clone is persisted, and only then does it replace the live map. A failed
//! persist therefore leaves both memory and disk untouched.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::normalize::{is_absolute, normalize};
use crate::rules::types::{
    sort_for_matching, DailyHits, HitDelta, Provenance, RedirectStatus, Rule, RuleDraft, RuleId,
    RuleMutation,
};

/// Days of per-day hit counts kept by [`JsonRuleStore`].
pub const DAILY_HITS_RETENTION_DAYS: i64 = 365;

type DailyBuckets = BTreeMap<NaiveDate, BTreeMap<RuleId, u64>>;

/// Errors surfaced by write (and explicit read) operations against the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("rule {0} not found")]
    NotFound(RuleId),

    #[error("invalid rule: {0}")]
    Invalid(String),

    #[error("rule store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Contract between the redirect core and whatever persists rules.
pub trait RuleStore: Send + Sync {
    /// Active, non-expired rules, exact rules first, ascending id within each group.
    fn load_active_rules(&self, now: DateTime<Utc>) -> StoreResult<Vec<Rule>>;

    /// Every stored rule in ascending id order.
    fn list_rules(&self) -> StoreResult<Vec<Rule>>;

    fn get_rule(&self, id: RuleId) -> StoreResult<Option<Rule>>;

    /// Insert (`draft.id == None`) or update a rule. Returns its id.
    fn save_rule(&self, draft: RuleDraft, now: DateTime<Utc>) -> StoreResult<RuleId>;

    /// Returns `false` if no rule had this id.
    fn delete_rule(&self, id: RuleId) -> StoreResult<bool>;

    /// Apply a batch atomically. Mutations naming unknown ids are skipped.
    /// Returns the ids of the rules the batch actually changed, in batch order.
    fn apply_batch(&self, mutations: &[RuleMutation], now: DateTime<Utc>) -> StoreResult<Vec<RuleId>>;

    /// Insert a new rule and apply `mutations` as one write. Returns the new id
    /// and the number of mutations applied.
    fn insert_with_batch(
        &self,
        draft: RuleDraft,
        mutations: &[RuleMutation],
        now: DateTime<Utc>,
    ) -> StoreResult<(RuleId, usize)>;

    /// Fold accumulated usage counters into the stored rules and the per-day
    /// totals.
    fn record_hits(&self, hits: &[HitDelta]) -> StoreResult<()>;

    /// Per-day hits from `since` onwards, oldest first, for one rule or for
    /// all of them. Days without hits are omitted.
    fn daily_hits(&self, since: NaiveDate, rule: Option<RuleId>) -> StoreResult<Vec<DailyHits>>;
}

/// On-disk layout of the JSON store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: RuleId,
    rules: Vec<Rule>,
    #[serde(default)]
    daily_hits: DailyBuckets,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    next_id: RuleId,
    rules: BTreeMap<RuleId, Rule>,
    daily_hits: DailyBuckets,
}

/// Rule store backed by an ordered map, optionally persisted as JSON.
#[derive(Debug, Default)]
pub struct JsonRuleStore {
    state: RwLock<StoreState>,
    persistence_path: Option<PathBuf>,
}

impl JsonRuleStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading existing rules if the file exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = StoreState::default();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let file: StoreFile = serde_json::from_reader(reader)?;
            let max_id = file.rules.iter().map(|r| r.id).max().unwrap_or(0);
            state.next_id = file.next_id.max(max_id);
            state.rules = file.rules.into_iter().map(|r| (r.id, r)).collect();
            state.daily_hits = file.daily_hits;
            tracing::info!(path = ?path, rules = state.rules.len(), "Loaded rule store");
        } else {
            tracing::info!(path = ?path, "Rule store file not found, starting empty");
        }

        Ok(Self {
            state: RwLock::new(state),
            persistence_path: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.rules.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let file = StoreFile {
            next_id: state.next_id,
            rules: state.rules.values().cloned().collect(),
            daily_hits: state.daily_hits.clone(),
        };

        // Write to a sibling temp file and rename so readers never see a torn file.
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &file)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Clone, mutate, persist, publish.
    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }
}

impl RuleStore for JsonRuleStore {
    fn load_active_rules(&self, now: DateTime<Utc>) -> StoreResult<Vec<Rule>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut rules: Vec<Rule> = state
            .rules
            .values()
            .filter(|r| r.is_live(now))
            .cloned()
            .collect();
        sort_for_matching(&mut rules);
        Ok(rules)
    }

    fn list_rules(&self) -> StoreResult<Vec<Rule>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.rules.values().cloned().collect())
    }

    fn get_rule(&self, id: RuleId) -> StoreResult<Option<Rule>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.rules.get(&id).cloned())
    }

    fn save_rule(&self, draft: RuleDraft, now: DateTime<Utc>) -> StoreResult<RuleId> {
        let draft = prepare_draft(draft)?;

        self.write(|state| {
            let id = match draft.id {
                Some(id) => {
                    let existing = state.rules.get_mut(&id).ok_or(StoreError::NotFound(id))?;
                    existing.source = draft.source;
                    existing.target = draft.target;
                    existing.status = draft.status;
                    existing.is_regex = draft.is_regex;
                    existing.is_active = draft.is_active.unwrap_or(existing.is_active);
                    existing.expires_at = draft.expires_at;
                    existing.group = draft.group;
                    existing.provenance = draft.provenance;
                    existing.note = draft.note;
                    existing.conditions = draft.conditions;
                    existing.updated_at = now;
                    id
                }
                None => insert_rule(state, draft, now),
            };
            Ok(id)
        })
    }

    fn delete_rule(&self, id: RuleId) -> StoreResult<bool> {
        {
            let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
            if !state.rules.contains_key(&id) {
                return Ok(false);
            }
        }
        self.write(|state| Ok(state.rules.remove(&id).is_some()))
    }

    fn apply_batch(&self, mutations: &[RuleMutation], now: DateTime<Utc>) -> StoreResult<Vec<RuleId>> {
        if mutations.is_empty() {
            return Ok(Vec::new());
        }

        self.write(|state| Ok(apply_mutations(state, mutations, now)))
    }

    fn insert_with_batch(
        &self,
        draft: RuleDraft,
        mutations: &[RuleMutation],
        now: DateTime<Utc>,
    ) -> StoreResult<(RuleId, usize)> {
        let draft = prepare_draft(draft)?;
        self.write(|state| {
            let id = insert_rule(state, draft, now);
            Ok((id, apply_mutations(state, mutations, now).len()))
        })
    }

    fn record_hits(&self, hits: &[HitDelta]) -> StoreResult<()> {
        if hits.is_empty() {
            return Ok(());
        }

        self.write(|state| {
            for hit in hits {
                if let Some(rule) = state.rules.get_mut(&hit.id) {
                    rule.hit_count += hit.count;
                    rule.last_hit = Some(rule.last_hit.map_or(hit.last_hit, |t| t.max(hit.last_hit)));
                    *state
                        .daily_hits
                        .entry(hit.day)
                        .or_default()
                        .entry(hit.id)
                        .or_default() += hit.count;
                }
            }

            let oldest_kept = Utc::now().date_naive() - Duration::days(DAILY_HITS_RETENTION_DAYS);
            state.daily_hits = state.daily_hits.split_off(&oldest_kept);
            Ok(())
        })
    }

    fn daily_hits(&self, since: NaiveDate, rule: Option<RuleId>) -> StoreResult<Vec<DailyHits>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .daily_hits
            .range(since..)
            .filter_map(|(date, per_rule)| {
                let hits = match rule {
                    Some(id) => per_rule.get(&id).copied().unwrap_or(0),
                    None => per_rule.values().sum(),
                };
                (hits > 0).then_some(DailyHits { date: *date, hits })
            })
            .collect())
    }
}

fn insert_rule(state: &mut StoreState, draft: RuleDraft, now: DateTime<Utc>) -> RuleId {
    state.next_id += 1;
    let id = state.next_id;
    state.rules.insert(
        id,
        Rule {
            id,
            source: draft.source,
            target: draft.target,
            status: draft.status,
            is_regex: draft.is_regex,
            is_active: draft.is_active.unwrap_or(true),
            expires_at: draft.expires_at,
            group: draft.group,
            hit_count: 0,
            last_hit: None,
            provenance: draft.provenance,
            note: draft.note,
            conditions: draft.conditions,
            created_at: now,
            updated_at: now,
        },
    );
    id
}

fn apply_mutations(state: &mut StoreState, mutations: &[RuleMutation], now: DateTime<Utc>) -> Vec<RuleId> {
    let mut applied = Vec::new();
    for mutation in mutations {
        let id = mutation.id();
        let changed = match mutation {
            RuleMutation::Delete { .. } => state.rules.remove(&id).is_some(),
            other => match state.rules.get_mut(&id) {
                Some(rule) => {
                    apply_mutation(rule, other, now);
                    true
                }
                None => false,
            },
        };
        if changed {
            applied.push(id);
        } else {
            tracing::debug!(rule_id = id, "Batch mutation skipped, rule no longer exists");
        }
    }
    applied
}

fn apply_mutation(rule: &mut Rule, mutation: &RuleMutation, now: DateTime<Utc>) {
    match mutation {
        RuleMutation::SetTarget { target, .. } => {
            rule.target = target.clone();
        }
        RuleMutation::Deactivate { note, .. } => {
            rule.is_active = false;
            rule.append_note(note);
        }
        RuleMutation::ConvertToGone { note, .. } => {
            rule.status = RedirectStatus::Gone;
            rule.target.clear();
            rule.provenance = Provenance::Auto410;
            rule.append_note(note);
        }
        RuleMutation::Delete { .. } => return,
    }
    rule.updated_at = now;
}

/// Sanitize a draft before it is written.
///
/// Exact sources and site-relative targets are normalized, absolute targets
/// must parse as URLs, 410 rules drop their target, every other rule needs one.
/// Pattern sources are stored as given (trimmed); whether they compile is a
/// warning reported by the rule manager, not a write failure.
pub fn prepare_draft(mut draft: RuleDraft) -> StoreResult<RuleDraft> {
    let source = draft.source.trim();
    if source.is_empty() {
        return Err(StoreError::Invalid("source must not be empty".into()));
    }
    draft.source = if draft.is_regex {
        source.to_string()
    } else {
        normalize(source)
    };

    if draft.status.is_gone() {
        draft.target.clear();
    } else {
        let target = draft.target.trim();
        if target.is_empty() {
            return Err(StoreError::Invalid(format!(
                "a {} rule needs a target",
                draft.status
            )));
        }
        draft.target = if is_absolute(target) {
            validate_absolute_target(target)?;
            target.to_string()
        } else if draft.is_regex {
            // Capture templates keep their placeholders and case.
            target.to_string()
        } else {
            normalize(target)
        };
    }

    draft.conditions.retain(|c| !c.kind.trim().is_empty());
    draft.group = draft.group.filter(|g| !g.trim().is_empty());
    Ok(draft)
}

/// Absolute targets must be well-formed URLs with a host.
fn validate_absolute_target(target: &str) -> StoreResult<()> {
    let invalid = |reason: String| StoreError::Invalid(format!("target '{}' is not a valid URL: {}", target, reason));

    if target.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("contains whitespace or control characters".into()));
    }
    let url = if target.starts_with("//") {
        url::Url::parse(&format!("http:{}", target))
    } else {
        url::Url::parse(target)
    }
    .map_err(|e| invalid(e.to_string()))?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid("missing host".into())),
    }
}
