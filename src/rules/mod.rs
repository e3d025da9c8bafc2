//! Rule storage and caching subsystem.
//!
//! # Data Flow
//! ```text
//! Write path (admin API, content hooks, chain fixer, aging):
//!     RuleDraft / RuleMutation[]
//!     → manager.rs (sanitize, collect warnings)
//!     → store.rs (RuleStore: copy, mutate, persist, publish)
//!     → cache.rs invalidate() (exactly once per call)
//!
//! Read path (every request):
//!     cache.rs get_active_rules()
//!     → fresh snapshot? return Arc<RuleSet>
//!     → otherwise store.load_active_rules(now) → compile → publish snapshot
//!
//! Usage:
//!     hits.rs record() on the hot path
//!     → HitFlusher drains into store.record_hits() on an interval
//! ```
//!
//! # Design Decisions
//! - Identifiers are ascending integers and define first-match order
//! - Exact sources are normalized on write; patterns are stored verbatim
//! - Reads fail open, writes fail loudly

pub mod cache;
pub mod hits;
pub mod manager;
pub mod normalize;
pub mod store;
pub mod types;

pub use cache::RuleCache;
pub use hits::{HitFlusher, HitTracker};
pub use manager::{RuleManager, SavedRule};
pub use normalize::normalize;
pub use store::{JsonRuleStore, RuleStore, StoreError, StoreResult};
pub use types::{
    Condition, DailyHits, Provenance, RedirectStatus, Rule, RuleDraft, RuleId, RuleMutation,
};
