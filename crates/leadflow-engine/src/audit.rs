//! Audit Recorder.
//!
//! Builders for the two append-only tables and the read side of the trail.
//! Writers always go through [`AuditRepo`] on the caller's transaction, so an
//! audit row commits or rolls back with the change it describes.

use leadflow_core::{ContactId, HistoryChangeType, LifecycleEventType};
use leadflow_store::{
    AssignmentHistoryEntry, AssignmentRepo, AssignmentRule, AuditRepo, ContactAssignment,
    ContactRepo, LifecycleEvent, NewHistoryEntry, NewLifecycleEvent,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::engine::LeadEngine;
use crate::errors::Result;

/// History row with every optional column empty.
pub(crate) fn history(contact_id: &ContactId, change_type: HistoryChangeType, at: &str) -> NewHistoryEntry {
    NewHistoryEntry {
        contact_id: contact_id.clone(),
        assignment_id: None,
        change_type,
        from_user_id: None,
        to_user_id: None,
        rule_id: None,
        actor_id: None,
        reason: None,
        rule_snapshot: None,
        decision: None,
        created_at: at.to_owned(),
    }
}

/// Lifecycle event with every optional column empty.
pub(crate) fn event(contact_id: &ContactId, event_type: LifecycleEventType, at: &str) -> NewLifecycleEvent {
    NewLifecycleEvent {
        contact_id: contact_id.clone(),
        event_type,
        from_status: None,
        to_status: None,
        from_score: None,
        to_score: None,
        rule_id: None,
        actor_id: None,
        reason: None,
        details: None,
        created_at: at.to_owned(),
    }
}

/// The rule as it stood when it decided, so history stays readable after the
/// rule is edited or deleted.
pub fn rule_snapshot(rule: &AssignmentRule) -> Value {
    json!({
        "id": rule.id,
        "name": rule.name,
        "priority": rule.priority,
        "is_default": rule.is_default,
        "conditions": rule.conditions.to_value(),
        "candidate_user_ids": rule.candidate_user_ids,
        "fallback_user_id": rule.fallback_user_id,
    })
}

/// Everything recorded about one contact.
#[derive(Clone, Debug, Serialize)]
pub struct ContactHistory {
    /// Assignment rows, oldest first.
    pub assignments: Vec<ContactAssignment>,
    /// Assignment history, oldest first.
    pub history: Vec<AssignmentHistoryEntry>,
    /// Lifecycle events, oldest first.
    pub events: Vec<LifecycleEvent>,
}

impl LeadEngine {
    /// Full audit trail of a contact.
    pub fn contact_history(&self, contact_id: &ContactId) -> Result<ContactHistory> {
        let conn = self.store().conn()?;
        let _ = ContactRepo::require(&conn, contact_id)?;
        Ok(ContactHistory {
            assignments: AssignmentRepo::list_for_contact(&conn, contact_id)?,
            history: AuditRepo::history_for_contact(&conn, contact_id)?,
            events: AuditRepo::events_for_contact(&conn, contact_id)?,
        })
    }
}
