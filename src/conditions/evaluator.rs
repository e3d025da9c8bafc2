//! Compiled condition sets.
//!
//! A rule's conditions are compiled once into a [`ConditionSet`] and combined
//! with AND semantics. An empty set always passes.

use crate::conditions::checks::{compile_condition, ConditionCheck, Never};
use crate::conditions::context::RequestContext;
use crate::rules::types::Condition;

/// All of a rule's conditions, ready to evaluate.
#[derive(Debug, Default)]
pub struct ConditionSet {
    checks: Vec<Box<dyn ConditionCheck>>,
}

impl ConditionSet {
    pub fn compile(conditions: &[Condition]) -> Self {
        let checks = conditions
            .iter()
            .map(|c| {
                compile_condition(c).unwrap_or_else(|reason| {
                    tracing::debug!(kind = %c.kind, operator = %c.operator, %reason, "Condition can never pass");
                    Box::new(Never { reason })
                })
            })
            .collect();
        Self { checks }
    }

    pub fn all_pass(&self, ctx: &RequestContext) -> bool {
        self.checks.iter().all(|c| c.evaluate(ctx))
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }
}

/// Evaluate stored conditions against a context without keeping the compiled form.
pub fn all_pass(conditions: &[Condition], ctx: &RequestContext) -> bool {
    ConditionSet::compile(conditions).all_pass(ctx)
}

/// Messages for every condition that can never pass, for save-time warnings.
pub fn condition_problems(conditions: &[Condition]) -> Vec<String> {
    conditions
        .iter()
        .filter_map(|c| compile_condition(c).err())
        .collect()
}
