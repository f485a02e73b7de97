//! Row types and creation parameters.

use leadflow_core::{
    AssignmentId, AssignmentStatus, ContactId, ContactPriority, ContactStatus, EventId,
    HistoryChangeType, HistoryId, LifecycleEventType, RuleId, RuleStatus, ScoreCategory,
    TransitionType, UserId,
};
use leadflow_rules::{ActionSet, ConditionSet, CriteriaSet, Prioritized};
use serde::Serialize;
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Users and contacts
// ─────────────────────────────────────────────────────────────────────────────

/// A user who can own contacts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct User {
    /// ID.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email.
    pub email: Option<String>,
    /// Inactive users are never selected and cannot be assigned manually.
    pub is_active: bool,
    /// Personal cap on open assignments.
    pub max_open_assignments: Option<i64>,
    /// Personal cap on assignments received in the trailing hour.
    pub max_assignments_per_hour: Option<i64>,
    /// Personal cap on assignments received in the trailing day.
    pub max_assignments_per_day: Option<i64>,
    /// Creation time.
    pub created_at: String,
}

/// Parameters for [`UserRepo::create`](crate::repo::UserRepo::create).
#[derive(Clone, Debug, Default)]
pub struct NewUser {
    /// Explicit ID; generated when `None`.
    pub id: Option<UserId>,
    /// Display name.
    pub name: String,
    /// Email.
    pub email: Option<String>,
    /// Defaults to active.
    pub inactive: bool,
    /// Personal open cap.
    pub max_open_assignments: Option<i64>,
    /// Personal hourly cap.
    pub max_assignments_per_hour: Option<i64>,
    /// Personal daily cap.
    pub max_assignments_per_day: Option<i64>,
}

/// A lead.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Contact {
    /// ID.
    pub id: ContactId,
    /// Display name.
    pub name: String,
    /// Email.
    pub email: Option<String>,
    /// Company.
    pub company: Option<String>,
    /// Country code.
    pub country: Option<String>,
    /// Acquisition source.
    pub source: Option<String>,
    /// Lifecycle status.
    pub status: ContactStatus,
    /// Priority.
    pub priority: ContactPriority,
    /// Current lead score.
    pub lead_score: i64,
    /// Breakdown of the last computed score.
    pub score_breakdown: Option<Value>,
    /// Stage derived from the last score.
    pub lifecycle_stage: Option<String>,
    /// Current owner.
    pub assigned_to: Option<UserId>,
    /// When the current owner was assigned.
    pub assigned_at: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Free-form attributes usable in conditions.
    pub custom_fields: Map<String, Value>,
    /// When `status` last changed.
    pub status_entered_at: String,
    /// First recorded activity.
    pub first_activity_at: Option<String>,
    /// Latest recorded activity.
    pub last_activity_at: Option<String>,
    /// When the score was last computed.
    pub last_scored_at: Option<String>,
    /// First entry into `qualified`.
    pub qualified_at: Option<String>,
    /// First entry into `closed_won`.
    pub converted_at: Option<String>,
    /// Optimistic-lock counter.
    pub version: i64,
    /// Creation time.
    pub created_at: String,
    /// Last update time.
    pub updated_at: String,
}

/// Parameters for [`ContactRepo::create`](crate::repo::ContactRepo::create).
#[derive(Clone, Debug, Default)]
pub struct NewContact {
    /// Explicit ID; generated when `None`.
    pub id: Option<ContactId>,
    /// Display name.
    pub name: String,
    /// Email.
    pub email: Option<String>,
    /// Company.
    pub company: Option<String>,
    /// Country code.
    pub country: Option<String>,
    /// Acquisition source.
    pub source: Option<String>,
    /// Defaults to `new`.
    pub status: Option<ContactStatus>,
    /// Defaults to `medium`.
    pub priority: Option<ContactPriority>,
    /// Tags.
    pub tags: Vec<String>,
    /// Custom fields.
    pub custom_fields: Map<String, Value>,
    /// Activity timestamps.
    pub first_activity_at: Option<String>,
    /// Activity timestamps.
    pub last_activity_at: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignment
// ─────────────────────────────────────────────────────────────────────────────

/// An automatic assignment rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignmentRule {
    /// ID.
    pub id: RuleId,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Lower runs first.
    pub priority: i64,
    /// Only `active` rules are evaluated.
    pub status: RuleStatus,
    /// Used only when no ordinary rule matches; its conditions are ignored.
    pub is_default: bool,
    /// Conditions, compiled on load.
    pub conditions: ConditionSet,
    /// Candidate pool.
    pub candidate_user_ids: Vec<UserId>,
    /// Used when the pool is exhausted.
    pub fallback_user_id: Option<UserId>,
    /// Whether the window below applies.
    pub business_hours_enabled: bool,
    /// Window start, `HH:MM`.
    pub business_hours_start: Option<String>,
    /// Window end, `HH:MM`.
    pub business_hours_end: Option<String>,
    /// Lowercase weekday names; empty means every day.
    pub working_days: Vec<String>,
    /// IANA timezone of the window.
    pub timezone: Option<String>,
    /// Per-user cap for the trailing hour.
    pub max_assignments_per_hour: Option<i64>,
    /// Per-user cap for the trailing day.
    pub max_assignments_per_day: Option<i64>,
    /// Times this rule matched a contact.
    pub total_assignments: i64,
    /// Times a match ended with an owner.
    pub successful_assignments: i64,
    /// Last time this rule matched.
    pub last_assignment_at: Option<String>,
    /// Creator.
    pub created_by: Option<UserId>,
    /// Creation time.
    pub created_at: String,
    /// Last update time.
    pub updated_at: String,
    /// Soft-delete marker.
    pub deleted_at: Option<String>,
}

impl Prioritized for AssignmentRule {
    fn priority(&self) -> i64 {
        self.priority
    }
    fn rule_id(&self) -> &str {
        &self.id
    }
}

/// Parameters for [`AssignmentRuleRepo::create`](crate::repo::AssignmentRuleRepo::create).
#[derive(Clone, Debug)]
pub struct NewAssignmentRule {
    /// Explicit ID; generated when `None`.
    pub id: Option<RuleId>,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Lower runs first.
    pub priority: i64,
    /// Initial status.
    pub status: RuleStatus,
    /// Default-rule flag.
    pub is_default: bool,
    /// Raw JSON condition array.
    pub conditions: Value,
    /// Candidate pool.
    pub candidate_user_ids: Vec<UserId>,
    /// Fallback user.
    pub fallback_user_id: Option<UserId>,
    /// Business-hours flag.
    pub business_hours_enabled: bool,
    /// Window start.
    pub business_hours_start: Option<String>,
    /// Window end.
    pub business_hours_end: Option<String>,
    /// Working days.
    pub working_days: Vec<String>,
    /// Timezone.
    pub timezone: Option<String>,
    /// Hourly cap.
    pub max_assignments_per_hour: Option<i64>,
    /// Daily cap.
    pub max_assignments_per_day: Option<i64>,
    /// Creator.
    pub created_by: Option<UserId>,
}

impl Default for NewAssignmentRule {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            description: None,
            priority: 100,
            status: RuleStatus::Active,
            is_default: false,
            conditions: Value::Array(Vec::new()),
            candidate_user_ids: Vec::new(),
            fallback_user_id: None,
            business_hours_enabled: false,
            business_hours_start: None,
            business_hours_end: None,
            working_days: Vec::new(),
            timezone: None,
            max_assignments_per_hour: None,
            max_assignments_per_day: None,
            created_by: None,
        }
    }
}

/// A `contact_assignments` row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContactAssignment {
    /// ID.
    pub id: AssignmentId,
    /// Contact.
    pub contact_id: ContactId,
    /// Owner.
    pub assigned_to: UserId,
    /// Acting user; `None` for the system.
    pub assigned_by: Option<UserId>,
    /// Rule that chose the owner; `None` for manual assignment.
    pub rule_id: Option<RuleId>,
    /// State.
    pub status: AssignmentStatus,
    /// Free-text reason.
    pub reason: Option<String>,
    /// Capacity problem overridden by a manual assignment.
    pub capacity_warning: Option<String>,
    /// Creation time.
    pub assigned_at: String,
    /// Acceptance time.
    pub accepted_at: Option<String>,
    /// When it left the open states.
    pub closed_at: Option<String>,
}

/// Parameters for [`AssignmentRepo::insert`](crate::repo::AssignmentRepo::insert).
#[derive(Clone, Debug)]
pub struct NewAssignment<'a> {
    /// Contact.
    pub contact_id: &'a ContactId,
    /// Owner.
    pub assigned_to: &'a UserId,
    /// Acting user.
    pub assigned_by: Option<&'a UserId>,
    /// Deciding rule.
    pub rule_id: Option<&'a RuleId>,
    /// Reason.
    pub reason: Option<&'a str>,
    /// Capacity warning.
    pub capacity_warning: Option<&'a str>,
    /// Creation time.
    pub assigned_at: &'a str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle rules
// ─────────────────────────────────────────────────────────────────────────────

/// A lead scoring rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoringRule {
    /// ID.
    pub id: RuleId,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Bucket the contribution goes to.
    pub category: ScoreCategory,
    /// Gate: the rule contributes only when these hold.
    pub applicable_when: ConditionSet,
    /// Weighted criteria.
    pub criteria: CriteriaSet,
    /// Points granted whenever the gate holds.
    pub base_score: i64,
    /// Cap on this rule's contribution.
    pub max_score: i64,
    /// Lower runs first.
    pub priority: i64,
    /// Only active rules are evaluated.
    pub is_active: bool,
    /// Scoring passes in which this rule contributed points.
    pub times_applied: i64,
    /// Last such pass.
    pub last_applied_at: Option<String>,
    /// Creation time.
    pub created_at: String,
}

impl Prioritized for ScoringRule {
    fn priority(&self) -> i64 {
        self.priority
    }
    fn rule_id(&self) -> &str {
        &self.id
    }
}

/// Parameters for [`ScoringRuleRepo::create`](crate::repo::ScoringRuleRepo::create).
#[derive(Clone, Debug)]
pub struct NewScoringRule {
    /// Explicit ID; generated when `None`.
    pub id: Option<RuleId>,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Category.
    pub category: ScoreCategory,
    /// Raw JSON gate conditions.
    pub applicable_when: Value,
    /// Raw JSON criteria.
    pub criteria: Value,
    /// Base points.
    pub base_score: i64,
    /// Contribution cap.
    pub max_score: i64,
    /// Priority.
    pub priority: i64,
}

impl Default for NewScoringRule {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            description: None,
            category: ScoreCategory::Custom,
            applicable_when: Value::Array(Vec::new()),
            criteria: Value::Array(Vec::new()),
            base_score: 0,
            max_score: 100,
            priority: 100,
        }
    }
}

/// A status transition rule: one edge of the lifecycle state machine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransitionRule {
    /// ID.
    pub id: RuleId,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Source status.
    pub from_status: ContactStatus,
    /// Target status.
    pub to_status: ContactStatus,
    /// How the rule is applied.
    pub transition_type: TransitionType,
    /// Guard conditions.
    pub conditions: ConditionSet,
    /// Minimum lead score.
    pub required_score: Option<i64>,
    /// Minimum whole days in the source status.
    pub days_in_status: Option<i64>,
    /// Side effects applied with the status change.
    pub actions: ActionSet,
    /// Users notified after the change commits.
    pub notify_users: Vec<UserId>,
    /// Lower runs first.
    pub priority: i64,
    /// Only active rules are evaluated.
    pub is_active: bool,
    /// Creation time.
    pub created_at: String,
}

impl Prioritized for TransitionRule {
    fn priority(&self) -> i64 {
        self.priority
    }
    fn rule_id(&self) -> &str {
        &self.id
    }
}

/// Parameters for [`TransitionRuleRepo::create`](crate::repo::TransitionRuleRepo::create).
#[derive(Clone, Debug)]
pub struct NewTransitionRule {
    /// Explicit ID; generated when `None`.
    pub id: Option<RuleId>,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Source status.
    pub from_status: ContactStatus,
    /// Target status.
    pub to_status: ContactStatus,
    /// Transition type.
    pub transition_type: TransitionType,
    /// Raw JSON conditions.
    pub conditions: Value,
    /// Minimum score.
    pub required_score: Option<i64>,
    /// Minimum days in status.
    pub days_in_status: Option<i64>,
    /// Raw JSON actions.
    pub actions: Value,
    /// Users to notify.
    pub notify_users: Vec<UserId>,
    /// Priority.
    pub priority: i64,
}

impl Default for NewTransitionRule {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            description: None,
            from_status: ContactStatus::New,
            to_status: ContactStatus::Contacted,
            transition_type: TransitionType::Automatic,
            conditions: Value::Array(Vec::new()),
            required_score: None,
            days_in_status: None,
            actions: Value::Array(Vec::new()),
            notify_users: Vec::new(),
            priority: 100,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

/// An `assignment_history` row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignmentHistoryEntry {
    /// ID.
    pub id: HistoryId,
    /// Contact.
    pub contact_id: ContactId,
    /// Assignment the change concerns, if one exists.
    pub assignment_id: Option<AssignmentId>,
    /// Kind of change.
    pub change_type: HistoryChangeType,
    /// Previous owner.
    pub from_user_id: Option<UserId>,
    /// New owner.
    pub to_user_id: Option<UserId>,
    /// Rule involved.
    pub rule_id: Option<RuleId>,
    /// Acting user; `None` for the system.
    pub actor_id: Option<UserId>,
    /// Reason.
    pub reason: Option<String>,
    /// The rule as it was when it decided.
    pub rule_snapshot: Option<Value>,
    /// Decision trace.
    pub decision: Option<Value>,
    /// Time of the change.
    pub created_at: String,
}

/// Parameters for [`AuditRepo::append_history`](crate::repo::AuditRepo::append_history).
#[derive(Clone, Debug)]
pub struct NewHistoryEntry {
    /// Contact.
    pub contact_id: ContactId,
    /// Assignment.
    pub assignment_id: Option<AssignmentId>,
    /// Kind of change.
    pub change_type: HistoryChangeType,
    /// Previous owner.
    pub from_user_id: Option<UserId>,
    /// New owner.
    pub to_user_id: Option<UserId>,
    /// Rule.
    pub rule_id: Option<RuleId>,
    /// Actor.
    pub actor_id: Option<UserId>,
    /// Reason.
    pub reason: Option<String>,
    /// Rule snapshot.
    pub rule_snapshot: Option<Value>,
    /// Decision trace.
    pub decision: Option<Value>,
    /// Time of the change.
    pub created_at: String,
}

/// A `lifecycle_events` row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LifecycleEvent {
    /// ID.
    pub id: EventId,
    /// Contact.
    pub contact_id: ContactId,
    /// Kind of event.
    pub event_type: LifecycleEventType,
    /// Status before.
    pub from_status: Option<ContactStatus>,
    /// Status after.
    pub to_status: Option<ContactStatus>,
    /// Score before.
    pub from_score: Option<i64>,
    /// Score after.
    pub to_score: Option<i64>,
    /// Triggering rule.
    pub rule_id: Option<RuleId>,
    /// Acting user; `None` for the system.
    pub actor_id: Option<UserId>,
    /// Reason.
    pub reason: Option<String>,
    /// Event-specific payload.
    pub details: Option<Value>,
    /// Event time.
    pub created_at: String,
}

/// Parameters for [`AuditRepo::append_event`](crate::repo::AuditRepo::append_event).
#[derive(Clone, Debug)]
pub struct NewLifecycleEvent {
    /// Contact.
    pub contact_id: ContactId,
    /// Kind of event.
    pub event_type: LifecycleEventType,
    /// Status before.
    pub from_status: Option<ContactStatus>,
    /// Status after.
    pub to_status: Option<ContactStatus>,
    /// Score before.
    pub from_score: Option<i64>,
    /// Score after.
    pub to_score: Option<i64>,
    /// Triggering rule.
    pub rule_id: Option<RuleId>,
    /// Actor.
    pub actor_id: Option<UserId>,
    /// Reason.
    pub reason: Option<String>,
    /// Payload.
    pub details: Option<Value>,
    /// Event time.
    pub created_at: String,
}
