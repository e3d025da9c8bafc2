//! Log of requests no rule answered.
//!
//! # Data Flow
//! ```text
//! redirect_handler → MatchResult::PassThrough (path not excluded)
//!     → NotFoundLog::record   anonymize ip, group by path, evict at capacity
//! NotFoundSweeper (every interval) → NotFoundLog::sweep   retention window
//! Admin API → list / resolve / delete / count_last_hour
//! ```

pub mod log;
pub mod sweeper;

pub use log::{
    anonymize_ip, EntryId, NotFoundEntry, NotFoundHit, NotFoundLog, NotFoundPage, NotFoundQuery,
    NotFoundSettings, ResolvedFilter, SortKey,
};
pub use sweeper::NotFoundSweeper;
