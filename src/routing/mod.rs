//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (normalized path + RequestContext)
//!     → router.rs (excluded paths, cache read)
//!     → matcher.rs (exact map, then anchored patterns)
//!     → conditions (selected rule only)
//!     → Return: Redirect / Gone / PassThrough
//!
//! Rule Compilation (on cache rebuild):
//!     Rule[] from the store
//!     → Sort exact-first, ascending id
//!     → Compile patterns, templates and condition sets
//!     → Freeze as immutable RuleSet
//! ```
//!
//! # Design Decisions
//! - Rule sets are immutable once built; rebuilds swap a whole new set in
//! - Exact rules are a hash lookup; only pattern rules are scanned
//! - Deterministic: same rules and input always produce the same result
//! - First match wins (exact before pattern, lowest id first)

pub mod matcher;
pub mod router;

pub use matcher::{MatchKind, MatchResult, RuleMatch, RuleSet, RuleWarning};
pub use router::Redirector;
