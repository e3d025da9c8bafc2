//! Condition evaluation subsystem.
//!
//! # Data Flow
//! ```text
//! Rule compilation (on cache rebuild):
//!     Condition { type, operator, value }[]
//!     → checks.rs (one ConditionCheck per kind, parsed once)
//!     → evaluator.rs (ConditionSet, AND semantics)
//!
//! Live request (after the matcher selected a rule):
//!     http layer builds RequestContext (context.rs)
//!     → ConditionSet::all_pass(&ctx)
//!     → true: rule fires / false: pass-through
//! ```
//!
//! # Design Decisions
//! - Context is passed explicitly, never read from ambient state
//! - Adding a condition kind means adding a ConditionCheck type; evaluation
//!   control flow does not change
//! - Unknown kinds and malformed values fail closed

pub mod checks;
pub mod context;
pub mod evaluator;

pub use checks::{compile_condition, ConditionCheck, DeviceClass};
pub use context::{Principal, RequestContext};
pub use evaluator::{all_pass, ConditionSet};
