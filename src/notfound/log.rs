//! In-memory log of requests no rule answered.
//!
//! # Responsibilities
//! - Record pass-through requests with an anonymized client address
//! - Group repeats of the same path into one entry when enabled
//! - Page, filter, resolve and delete entries for the admin API
//! - Drop entries past the retention window
//!
//! # Design Decisions
//! - Entries live in a `DashMap` keyed by id; a second map indexes grouped
//!   entries by path. Locks are always taken index first, entries second
//! - The log is bounded: at capacity the least recently seen entry is evicted
//! - Nothing is persisted; the log restarts empty

use std::cmp::Ordering as CmpOrdering;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::observability::metrics;
use crate::rules::types::RuleId;

pub type EntryId = u64;

/// Upper bound on `per_page`.
pub const MAX_PAGE_SIZE: usize = 500;

/// Runtime settings, replaceable on config reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundSettings {
    pub enabled: bool,
    /// Fold repeats of a path into one entry.
    pub group: bool,
    pub max_entries: usize,
    /// Entries created longer ago are swept. `0` keeps them forever.
    pub retention_days: u32,
}

impl Default for NotFoundSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            group: true,
            max_entries: 10_000,
            retention_days: 30,
        }
    }
}

/// One unanswered request as it arrives.
#[derive(Debug, Clone, Default)]
pub struct NotFoundHit {
    /// Normalized path and query.
    pub path: String,
    pub client_ip: Option<IpAddr>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundEntry {
    pub id: EntryId,
    pub path: String,
    /// Client address with the host part zeroed.
    pub ip: Option<IpAddr>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub count: u64,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub resolved: bool,
    /// Rule that now answers this path, if one was named on resolve.
    pub redirect_id: Option<RuleId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedFilter {
    #[default]
    All,
    Resolved,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Id,
    Path,
    Count,
    CreatedAt,
    #[default]
    LastSeen,
}

/// Listing parameters. Pages are 1-based.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotFoundQuery {
    pub page: usize,
    pub per_page: usize,
    /// Case-insensitive substring of the path or referer.
    pub search: Option<String>,
    pub status: ResolvedFilter,
    pub sort: SortKey,
    pub ascending: bool,
}

impl Default for NotFoundQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 25,
            search: None,
            status: ResolvedFilter::All,
            sort: SortKey::LastSeen,
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotFoundPage {
    pub items: Vec<NotFoundEntry>,
    /// Entries matching the filters, across all pages.
    pub total: usize,
}

/// Zero the host part of an address: the last octet of IPv4, the last 80 bits
/// of IPv6.
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            IpAddr::from([a, b, c, 0])
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            octets[6..].fill(0);
            IpAddr::from(octets)
        }
    }
}

pub struct NotFoundLog {
    settings: ArcSwap<NotFoundSettings>,
    entries: DashMap<EntryId, NotFoundEntry>,
    by_path: DashMap<String, EntryId>,
    next_id: AtomicU64,
}

impl NotFoundLog {
    pub fn new(settings: NotFoundSettings) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            entries: DashMap::new(),
            by_path: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> Arc<NotFoundSettings> {
        self.settings.load_full()
    }

    pub fn set_settings(&self, settings: NotFoundSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log one unanswered request. Returns the entry it landed in, or `None`
    /// when logging is disabled.
    pub fn record(&self, hit: NotFoundHit, now: DateTime<Utc>) -> Option<EntryId> {
        let settings = self.settings.load();
        if !settings.enabled || settings.max_entries == 0 {
            return None;
        }

        let ip = hit.client_ip.map(anonymize_ip);

        if settings.group {
            match self.by_path.entry(hit.path.clone()) {
                Entry::Occupied(slot) => {
                    let id = *slot.get();
                    if let Some(mut entry) = self.entries.get_mut(&id) {
                        entry.count += 1;
                        entry.last_seen = now;
                        entry.ip = ip;
                        entry.referer = hit.referer;
                        entry.user_agent = hit.user_agent;
                        metrics::record_not_found(true);
                        return Some(id);
                    }
                    // Swept between the two lookups.
                    slot.remove();
                }
                Entry::Vacant(_) => {}
            }
        }

        while self.entries.len() >= settings.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if settings.group {
            self.by_path.insert(hit.path.clone(), id);
        }
        self.entries.insert(
            id,
            NotFoundEntry {
                id,
                path: hit.path,
                ip,
                referer: hit.referer,
                user_agent: hit.user_agent,
                count: 1,
                created_at: now,
                last_seen: now,
                resolved: false,
                redirect_id: None,
            },
        );
        metrics::record_not_found(false);
        metrics::record_not_found_entries(self.entries.len());
        Some(id)
    }

    pub fn get(&self, id: EntryId) -> Option<NotFoundEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn list(&self, query: &NotFoundQuery) -> NotFoundPage {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut matching: Vec<NotFoundEntry> = self
            .entries
            .iter()
            .filter(|e| match query.status {
                ResolvedFilter::All => true,
                ResolvedFilter::Resolved => e.resolved,
                ResolvedFilter::Unresolved => !e.resolved,
            })
            .filter(|e| match &needle {
                Some(needle) => {
                    e.path.to_lowercase().contains(needle.as_str())
                        || e
                            .referer
                            .as_deref()
                            .is_some_and(|r| r.to_lowercase().contains(needle.as_str()))
                }
                None => true,
            })
            .map(|e| e.value().clone())
            .collect();

        matching.sort_by(|a, b| {
            let ord = compare(a, b, query.sort).then_with(|| a.id.cmp(&b.id));
            if query.ascending {
                ord
            } else {
                ord.reverse()
            }
        });

        let total = matching.len();
        let per_page = query.per_page.clamp(1, MAX_PAGE_SIZE);
        let offset = query.page.max(1).saturating_sub(1).saturating_mul(per_page);
        let items = matching.into_iter().skip(offset).take(per_page).collect();
        NotFoundPage { items, total }
    }

    /// Mark an entry resolved, optionally naming the rule that now answers it.
    pub fn resolve(&self, id: EntryId, redirect_id: Option<RuleId>) -> bool {
        match self.entries.get_mut(&id) {
            Some(mut entry) => {
                entry.resolved = true;
                entry.redirect_id = redirect_id;
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, id: EntryId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                self.unindex(&entry);
                true
            }
            None => false,
        }
    }

    /// Entries created after `since`.
    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.entries.iter().filter(|e| e.created_at > since).count()
    }

    pub fn count_last_hour(&self, now: DateTime<Utc>) -> usize {
        self.count_since(now - Duration::hours(1))
    }

    /// Drop entries created before the retention window. Returns how many
    /// were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention_days = self.settings.load().retention_days;
        if retention_days == 0 {
            return 0;
        }
        let cutoff = now - Duration::days(i64::from(retention_days));

        let expired: Vec<EntryId> = self
            .entries
            .iter()
            .filter(|e| e.created_at < cutoff)
            .map(|e| e.id)
            .collect();

        let removed = expired.into_iter().filter(|id| self.delete(*id)).count();
        if removed > 0 {
            metrics::record_not_found_entries(self.entries.len());
        }
        removed
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by(|a, b| a.last_seen.cmp(&b.last_seen).then_with(|| a.id.cmp(&b.id)))
            .map(|e| e.id);
        match oldest {
            Some(id) => {
                tracing::debug!(entry_id = id, "404 log full, evicting oldest entry");
                self.delete(id)
            }
            None => false,
        }
    }

    fn unindex(&self, entry: &NotFoundEntry) {
        self.by_path.remove_if(&entry.path, |_, id| *id == entry.id);
    }
}

fn compare(a: &NotFoundEntry, b: &NotFoundEntry, key: SortKey) -> CmpOrdering {
    match key {
        SortKey::Id => a.id.cmp(&b.id),
        SortKey::Path => a.path.cmp(&b.path),
        SortKey::Count => a.count.cmp(&b.count),
        SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
        SortKey::LastSeen => a.last_seen.cmp(&b.last_seen),
    }
}
