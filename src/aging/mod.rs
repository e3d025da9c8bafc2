//! Rule aging.
//!
//! # Data Flow
//! ```text
//! AgingScheduler (every interval) or admin request
//!     → AgingEngine::candidates   policy.rs selection over all stored rules
//!     → cleanup::apply            one batch: deactivate | delete | convert_to_410
//!     → RuleManager::apply_batch  single cache invalidation
//!     → CleanupReport             kept as the last report
//! ```
//!
//! # Design Decisions
//! - Rules with an explicit expiry are never aged; they retire on their own date
//! - Settings live behind an `ArcSwap` so config reloads apply without a restart

pub mod cleanup;
pub mod policy;
pub mod scheduler;

pub use cleanup::{AgingEngine, AgingSettings, CleanupItem, CleanupReport, REPORT_SAMPLE_LIMIT};
pub use policy::{select_candidates, AgingPolicy, CleanupAction};
pub use scheduler::AgingScheduler;
