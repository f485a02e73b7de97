//! # leadflow-rules
//!
//! The pure half of the engine: everything needed to decide whether a rule
//! applies, with no I/O.
//!
//! - [`ConditionSet`]: ANDed `{field, operator, value}` conditions compiled
//!   once from JSON and evaluated against an entity plus a request context
//! - [`compare_rules`]: the `(priority, id)` evaluation order
//! - [`BusinessHours`]: weekday/time windows in a rule's timezone
//! - [`CriteriaSet`]: weighted scoring criteria
//! - [`ActionSet`]: typed side effects of a status transition

#![deny(unsafe_code)]

pub mod actions;
pub mod business_hours;
pub mod condition;
pub mod criteria;
pub mod errors;
pub mod ordering;
pub mod value;

pub use actions::{ActionSet, TransitionAction};
pub use business_hours::BusinessHours;
pub use condition::{Condition, ConditionFault, ConditionSet, Evaluation, Operator};
pub use criteria::{CriteriaEvaluation, CriteriaSet, Criterion, MatchedCriterion};
pub use errors::{Result, RuleError};
pub use ordering::{Prioritized, compare_rules, sort_rules};
pub use value::{FieldMap, FieldValue, field_map_from_json};

pub use chrono_tz::Tz;
