//! # leadflow-engine
//!
//! The rule-driven core of leadflow:
//!
//! - **Workload Tracker** ([`workload`]): open counts, trailing-window rate
//!   limits and business-hour windows
//! - **Assignment Rule Engine** ([`assignment`]): automatic routing, manual
//!   and bulk assignment, unassign/accept/complete
//! - **Lead Scoring Engine** ([`scoring`]): weighted, category-bucketed,
//!   clamped scores with a stored breakdown; [`analysis`] explains them
//! - **Status Transition Engine** ([`transitions`]): the data-defined
//!   lifecycle state machine, single pass per trigger
//! - **Audit Recorder** ([`audit`]): append-only history and lifecycle events
//! - **Sweep** ([`sweep`]): concurrent rescoring and re-evaluation
//!
//! Every mutating operation runs in one immediate `SQLite` transaction and
//! writes its audit rows in that same transaction.

#![deny(unsafe_code)]

pub mod analysis;
pub mod assignment;
pub mod audit;
pub mod engine;
pub mod errors;
pub mod fields;
pub mod notify;
pub mod scoring;
pub mod sweep;
pub mod transitions;
pub mod workload;

pub use analysis::{ScoreAnalysis, next_action_for, qualification_for};
pub use assignment::{AssignmentResult, DecisionTrace, PerContactResult, RejectedCandidate, SkippedRule};
pub use audit::{ContactHistory, rule_snapshot};
pub use engine::LeadEngine;
pub use errors::{EngineError, Result};
pub use fields::{contact_fields, context_fields};
pub use notify::{
    ChannelNotifier, LogNotifier, Notification, NotificationKind, NotificationPayload, Notifier,
    NotifyError,
};
pub use scoring::{RuleContribution, ScoreBreakdown, ScoreOutcome, compute_score, grade_for, stage_for};
pub use sweep::{SweepItem, SweepOptions, SweepReport};
pub use transitions::{StatusChange, Suggestion, TransitionOutcome};
pub use workload::{RuleCaps, Workload};
