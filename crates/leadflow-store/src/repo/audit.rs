use leadflow_core::{AssignmentId, ContactId, ContactStatus, EventId, HistoryId, RuleId, UserId};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{Result, StoreError};
use crate::repo::{enum_col, opt_enum_col, opt_json};
use crate::types::{AssignmentHistoryEntry, LifecycleEvent, NewHistoryEntry, NewLifecycleEvent};

/// Append-only audit trail: `assignment_history` and `lifecycle_events`.
///
/// There is no update or delete API. The schema triggers also
/// reject both, surfacing as [`StoreError::AppendOnly`].
pub struct AuditRepo;

impl AuditRepo {
    /// Append an assignment history row.
    pub fn append_history(conn: &Connection, entry: &NewHistoryEntry) -> Result<AssignmentHistoryEntry> {
        let id = HistoryId::new();
        let _ = conn.execute(
            "INSERT INTO assignment_history (id, contact_id, assignment_id, change_type,
             from_user_id, to_user_id, rule_id, actor_id, reason, rule_snapshot, decision, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id.as_str(),
                entry.contact_id.as_str(),
                entry.assignment_id.as_deref(),
                entry.change_type.as_sql(),
                entry.from_user_id.as_deref(),
                entry.to_user_id.as_deref(),
                entry.rule_id.as_deref(),
                entry.actor_id.as_deref(),
                entry.reason,
                entry.rule_snapshot.as_ref().map(serde_json::Value::to_string),
                entry.decision.as_ref().map(serde_json::Value::to_string),
                entry.created_at,
            ],
        )?;
        conn.query_row(
            "SELECT * FROM assignment_history WHERE id = ?1",
            [id.as_str()],
            history_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("assignment history", id.as_str()))
    }

    /// Assignment history of a contact, oldest first.
    pub fn history_for_contact(conn: &Connection, contact_id: &ContactId) -> Result<Vec<AssignmentHistoryEntry>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM assignment_history WHERE contact_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([contact_id.as_str()], history_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Append a lifecycle event.
    pub fn append_event(conn: &Connection, event: &NewLifecycleEvent) -> Result<LifecycleEvent> {
        let id = EventId::new();
        let _ = conn.execute(
            "INSERT INTO lifecycle_events (id, contact_id, event_type, from_status, to_status,
             from_score, to_score, rule_id, actor_id, reason, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id.as_str(),
                event.contact_id.as_str(),
                event.event_type.as_sql(),
                event.from_status.map(ContactStatus::as_sql),
                event.to_status.map(ContactStatus::as_sql),
                event.from_score,
                event.to_score,
                event.rule_id.as_deref(),
                event.actor_id.as_deref(),
                event.reason,
                event.details.as_ref().map(serde_json::Value::to_string),
                event.created_at,
            ],
        )?;
        conn.query_row(
            "SELECT * FROM lifecycle_events WHERE id = ?1",
            [id.as_str()],
            event_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("lifecycle event", id.as_str()))
    }

    /// Lifecycle events of a contact, oldest first.
    pub fn events_for_contact(conn: &Connection, contact_id: &ContactId) -> Result<Vec<LifecycleEvent>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM lifecycle_events WHERE contact_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([contact_id.as_str()], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<AssignmentHistoryEntry> {
    Ok(AssignmentHistoryEntry {
        id: HistoryId::from(row.get::<_, String>("id")?),
        contact_id: ContactId::from(row.get::<_, String>("contact_id")?),
        assignment_id: row.get::<_, Option<String>>("assignment_id")?.map(AssignmentId::from),
        change_type: enum_col(row, "change_type")?,
        from_user_id: row.get::<_, Option<String>>("from_user_id")?.map(UserId::from),
        to_user_id: row.get::<_, Option<String>>("to_user_id")?.map(UserId::from),
        rule_id: row.get::<_, Option<String>>("rule_id")?.map(RuleId::from),
        actor_id: row.get::<_, Option<String>>("actor_id")?.map(UserId::from),
        reason: row.get("reason")?,
        rule_snapshot: opt_json(row, "rule_snapshot")?,
        decision: opt_json(row, "decision")?,
        created_at: row.get("created_at")?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<LifecycleEvent> {
    Ok(LifecycleEvent {
        id: EventId::from(row.get::<_, String>("id")?),
        contact_id: ContactId::from(row.get::<_, String>("contact_id")?),
        event_type: enum_col(row, "event_type")?,
        from_status: opt_enum_col(row, "from_status")?,
        to_status: opt_enum_col(row, "to_status")?,
        from_score: row.get("from_score")?,
        to_score: row.get("to_score")?,
        rule_id: row.get::<_, Option<String>>("rule_id")?.map(RuleId::from),
        actor_id: row.get::<_, Option<String>>("actor_id")?.map(UserId::from),
        reason: row.get("reason")?,
        details: opt_json(row, "details")?,
        created_at: row.get("created_at")?,
    })
}
