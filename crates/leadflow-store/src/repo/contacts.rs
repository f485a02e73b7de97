use leadflow_core::{ContactId, ContactPriority, ContactStatus, UserId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Map;

use crate::errors::{Result, StoreError};
use crate::repo::{enum_col, json_vec, opt_json, to_json};
use crate::types::{Contact, NewContact};

/// Contact store.
///
/// Writes go through [`ContactRepo::save`], which bumps `version` and fails
/// with [`StoreError::ConcurrentModification`] if the row changed since it
/// was read.
pub struct ContactRepo;

impl ContactRepo {
    /// Create a contact.
    pub fn create(conn: &Connection, params: &NewContact, now: &str) -> Result<Contact> {
        let id = params.id.clone().unwrap_or_default();
        let _ = conn.execute(
            "INSERT INTO contacts (id, name, email, company, country, source, status, priority,
             tags, custom_fields, status_entered_at, first_activity_at, last_activity_at,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?11, ?11)",
            params![
                id.as_str(),
                params.name,
                params.email,
                params.company,
                params.country,
                params.source,
                params.status.unwrap_or(ContactStatus::New).as_sql(),
                params.priority.unwrap_or_default().as_sql(),
                to_json(&params.tags)?,
                to_json(&params.custom_fields)?,
                now,
                params.first_activity_at,
                params.last_activity_at,
            ],
        )?;
        Self::require(conn, &id)
    }

    /// Fetch a contact.
    pub fn get(conn: &Connection, id: &ContactId) -> Result<Option<Contact>> {
        Ok(conn
            .query_row(
                "SELECT * FROM contacts WHERE id = ?1",
                [id.as_str()],
                contact_from_row,
            )
            .optional()?)
    }

    /// Fetch a contact that must exist.
    pub fn require(conn: &Connection, id: &ContactId) -> Result<Contact> {
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("contact", id.as_str()))
    }

    /// IDs of contacts not in a closed status, by ID.
    pub fn list_open_ids(conn: &Connection) -> Result<Vec<ContactId>> {
        let mut stmt = conn.prepare(
            "SELECT id FROM contacts WHERE status NOT IN ('closed_won', 'closed_lost') ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0).map(ContactId::from))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Persist every mutable field of `contact`.
    ///
    /// On success `contact.version` and `contact.updated_at` reflect the new row.
    pub fn save(conn: &Connection, contact: &mut Contact, now: &str) -> Result<()> {
        let changed = conn.execute(
            "UPDATE contacts SET
               status = ?3, priority = ?4, lead_score = ?5, score_breakdown = ?6,
               lifecycle_stage = ?7, assigned_to = ?8, assigned_at = ?9, tags = ?10,
               custom_fields = ?11, status_entered_at = ?12, last_activity_at = ?13,
               last_scored_at = ?14, qualified_at = ?15, converted_at = ?16,
               version = version + 1, updated_at = ?17
             WHERE id = ?1 AND version = ?2",
            params![
                contact.id.as_str(),
                contact.version,
                contact.status.as_sql(),
                contact.priority.as_sql(),
                contact.lead_score,
                contact
                    .score_breakdown
                    .as_ref()
                    .map(serde_json::Value::to_string),
                contact.lifecycle_stage,
                contact.assigned_to.as_deref(),
                contact.assigned_at,
                to_json(&contact.tags)?,
                to_json(&contact.custom_fields)?,
                contact.status_entered_at,
                contact.last_activity_at,
                contact.last_scored_at,
                contact.qualified_at,
                contact.converted_at,
                now,
            ],
        )?;
        if changed == 0 {
            return match Self::get(conn, &contact.id)? {
                None => Err(StoreError::not_found("contact", contact.id.as_str())),
                Some(_) => Err(StoreError::ConcurrentModification(format!(
                    "contact {} changed since version {}",
                    contact.id, contact.version
                ))),
            };
        }
        contact.version += 1;
        now.clone_into(&mut contact.updated_at);
        Ok(())
    }
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    let custom_raw: String = row.get("custom_fields")?;
    Ok(Contact {
        id: ContactId::from(row.get::<_, String>("id")?),
        name: row.get("name")?,
        email: row.get("email")?,
        company: row.get("company")?,
        country: row.get("country")?,
        source: row.get("source")?,
        status: enum_col(row, "status")?,
        priority: enum_col::<ContactPriority>(row, "priority")?,
        lead_score: row.get("lead_score")?,
        score_breakdown: opt_json(row, "score_breakdown")?,
        lifecycle_stage: row.get("lifecycle_stage")?,
        assigned_to: row.get::<_, Option<String>>("assigned_to")?.map(UserId::from),
        assigned_at: row.get("assigned_at")?,
        tags: json_vec(row, "tags")?,
        custom_fields: serde_json::from_str::<Map<_, _>>(&custom_raw).unwrap_or_default(),
        status_entered_at: row.get("status_entered_at")?,
        first_activity_at: row.get("first_activity_at")?,
        last_activity_at: row.get("last_activity_at")?,
        last_scored_at: row.get("last_scored_at")?,
        qualified_at: row.get("qualified_at")?,
        converted_at: row.get("converted_at")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
