//! Evaluation order for every rule family.
//!
//! Rules run in ascending `priority`; equal priorities run in ascending ID.
//! Engines sort with [`compare_rules`] themselves instead of trusting the
//! order rows come back from the database.

use std::cmp::Ordering;

/// Anything that takes part in priority-ordered evaluation.
pub trait Prioritized {
    /// Lower runs first.
    fn priority(&self) -> i64;
    /// Tie-breaker.
    fn rule_id(&self) -> &str;
}

/// Total order: `(priority ASC, id ASC)`.
pub fn compare_rules<T: Prioritized + ?Sized>(a: &T, b: &T) -> Ordering {
    a.priority()
        .cmp(&b.priority())
        .then_with(|| a.rule_id().cmp(b.rule_id()))
}

/// Sort in evaluation order.
pub fn sort_rules<T: Prioritized>(rules: &mut [T]) {
    rules.sort_by(compare_rules);
}
