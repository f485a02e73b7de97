//! # leadflow-core
//!
//! Foundation crate shared by every other leadflow crate:
//!
//! - **Branded IDs**: [`ContactId`], [`UserId`], [`RuleId`] and friends, so a
//!   user ID can never be passed where a contact ID is expected
//! - **Vocabulary**: contact statuses, priorities, assignment states and the
//!   audit change kinds, each with a stable SQL/JSON spelling
//! - **Time**: the [`Clock`] seam plus ISO-8601 helpers used for every
//!   persisted timestamp
//! - **Logging**: subscriber setup and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, format_ts, parse_ts};
pub use errors::{CoreError, Result};
pub use ids::{AssignmentId, ContactId, EventId, HistoryId, RuleId, UserId};
pub use types::{
    AssignmentStatus, ContactPriority, ContactStatus, HistoryChangeType, LifecycleEventType,
    RuleStatus, ScoreCategory, TransitionType,
};
