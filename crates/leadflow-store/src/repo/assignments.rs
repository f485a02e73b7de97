use leadflow_core::{AssignmentId, AssignmentStatus, ContactId, RuleId, UserId};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{Result, StoreError};
use crate::repo::enum_col;
use crate::types::{ContactAssignment, NewAssignment};

/// `contact_assignments` access, including the workload counts.
pub struct AssignmentRepo;

impl AssignmentRepo {
    /// Insert an `active` assignment.
    ///
    /// Fails with [`StoreError::ConcurrentModification`] if the contact
    /// already has an open assignment.
    pub fn insert(conn: &Connection, params: &NewAssignment<'_>) -> Result<ContactAssignment> {
        let id = AssignmentId::new();
        let _ = conn.execute(
            "INSERT INTO contact_assignments (id, contact_id, assigned_to, assigned_by, rule_id,
             status, reason, capacity_warning, assigned_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?8)",
            params![
                id.as_str(),
                params.contact_id.as_str(),
                params.assigned_to.as_str(),
                params.assigned_by.map(UserId::as_str),
                params.rule_id.map(RuleId::as_str),
                params.reason,
                params.capacity_warning,
                params.assigned_at,
            ],
        )?;
        Self::get(conn, &id)?.ok_or_else(|| StoreError::not_found("assignment", id.as_str()))
    }

    /// Fetch an assignment.
    pub fn get(conn: &Connection, id: &AssignmentId) -> Result<Option<ContactAssignment>> {
        Ok(conn
            .query_row(
                "SELECT * FROM contact_assignments WHERE id = ?1",
                [id.as_str()],
                assignment_from_row,
            )
            .optional()?)
    }

    /// The contact's open (`active` or `accepted`) assignment.
    pub fn open_for_contact(conn: &Connection, contact_id: &ContactId) -> Result<Option<ContactAssignment>> {
        Ok(conn
            .query_row(
                "SELECT * FROM contact_assignments
                 WHERE contact_id = ?1 AND status IN ('active', 'accepted')",
                [contact_id.as_str()],
                assignment_from_row,
            )
            .optional()?)
    }

    /// Every assignment of a contact, oldest first.
    pub fn list_for_contact(conn: &Connection, contact_id: &ContactId) -> Result<Vec<ContactAssignment>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM contact_assignments WHERE contact_id = ?1 ORDER BY assigned_at, id",
        )?;
        let rows = stmt.query_map([contact_id.as_str()], assignment_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Move an open assignment to a terminal status.
    pub fn close(
        conn: &Connection,
        id: &AssignmentId,
        status: AssignmentStatus,
        closed_at: &str,
    ) -> Result<()> {
        if status.is_open() {
            return Err(StoreError::Internal(format!(
                "cannot close assignment {id} into open status {status}"
            )));
        }
        let changed = conn.execute(
            "UPDATE contact_assignments SET status = ?2, closed_at = ?3
             WHERE id = ?1 AND status IN ('active', 'accepted')",
            params![id.as_str(), status.as_sql(), closed_at],
        )?;
        if changed == 0 {
            return Err(StoreError::ConcurrentModification(format!(
                "assignment {id} is no longer open"
            )));
        }
        Ok(())
    }

    /// Mark an `active` assignment as accepted.
    pub fn accept(conn: &Connection, id: &AssignmentId, accepted_at: &str) -> Result<()> {
        let changed = conn.execute(
            "UPDATE contact_assignments SET status = 'accepted', accepted_at = ?2
             WHERE id = ?1 AND status = 'active'",
            params![id.as_str(), accepted_at],
        )?;
        if changed == 0 {
            return Err(StoreError::ConcurrentModification(format!(
                "assignment {id} is no longer active"
            )));
        }
        Ok(())
    }

    /// Open assignments owned by `user_id`.
    pub fn open_count(conn: &Connection, user_id: &UserId) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM contact_assignments
             WHERE assigned_to = ?1 AND status IN ('active', 'accepted')",
            [user_id.as_str()],
            |row| row.get(0),
        )?)
    }

    /// Assignments `user_id` received strictly after `since`, whatever their
    /// current status. An assignment made exactly at `since` has left the window.
    pub fn count_assigned_after(conn: &Connection, user_id: &UserId, since: &str) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM contact_assignments WHERE assigned_to = ?1 AND assigned_at > ?2",
            params![user_id.as_str(), since],
            |row| row.get(0),
        )?)
    }
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<ContactAssignment> {
    Ok(ContactAssignment {
        id: AssignmentId::from(row.get::<_, String>("id")?),
        contact_id: ContactId::from(row.get::<_, String>("contact_id")?),
        assigned_to: UserId::from(row.get::<_, String>("assigned_to")?),
        assigned_by: row.get::<_, Option<String>>("assigned_by")?.map(UserId::from),
        rule_id: row.get::<_, Option<String>>("rule_id")?.map(RuleId::from),
        status: enum_col(row, "status")?,
        reason: row.get("reason")?,
        capacity_warning: row.get("capacity_warning")?,
        assigned_at: row.get("assigned_at")?,
        accepted_at: row.get("accepted_at")?,
        closed_at: row.get("closed_at")?,
    })
}
