//! Off-hot-path rule analysis.
//!
//! # Data Flow
//! ```text
//! Admin request
//!     → store.load_active_rules(now) (fresh read, not the TTL cache)
//!     → chains.rs     find_all_chains / find_loops / trace_chain
//!                     fix_chains → RuleManager::apply_batch (one write, one invalidate)
//!     → duplicates.rs rules sharing a source
//!     → tester.rs     dry run of the live pipeline against the cached RuleSet
//!     → export.rs     Apache / Nginx directives
//! ```
//!
//! # Design Decisions
//! - Analysis works on owned snapshots; the store is only locked for the final batch
//! - Nothing here runs per request

pub mod chains;
pub mod duplicates;
pub mod export;
pub mod tester;

pub use chains::{fix_chains, find_all_chains, find_loops, trace_chain, Chain, ChainFixReport, ChainStep, MAX_HOPS};
pub use duplicates::{find_duplicates, DuplicateGroup};
pub use export::{export_rules, ExportFormat};
pub use tester::{test_path, PathTestReport};
