use leadflow_core::{RuleId, RuleStatus, UserId};
use leadflow_rules::ConditionSet;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{Result, StoreError};
use crate::repo::{enum_col, json_vec, to_json};
use crate::types::{AssignmentRule, NewAssignmentRule};

/// Assignment rule administration and lookup.
///
/// Rules are never hard-deleted: history rows keep referring to them.
pub struct AssignmentRuleRepo;

impl AssignmentRuleRepo {
    /// Create a rule.
    pub fn create(conn: &Connection, params: &NewAssignmentRule, now: &str) -> Result<AssignmentRule> {
        let id = params.id.clone().unwrap_or_default();
        let _ = conn.execute(
            "INSERT INTO assignment_rules (id, name, description, priority, status, is_default,
             conditions, candidate_user_ids, fallback_user_id, business_hours_enabled,
             business_hours_start, business_hours_end, working_days, timezone,
             max_assignments_per_hour, max_assignments_per_day, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)",
            params![
                id.as_str(),
                params.name,
                params.description,
                params.priority,
                params.status.as_sql(),
                params.is_default,
                params.conditions.to_string(),
                to_json(&params.candidate_user_ids)?,
                params.fallback_user_id.as_deref(),
                params.business_hours_enabled,
                params.business_hours_start,
                params.business_hours_end,
                to_json(&params.working_days)?,
                params.timezone,
                params.max_assignments_per_hour,
                params.max_assignments_per_day,
                params.created_by.as_deref(),
                now,
            ],
        )?;
        Self::get(conn, &id)?.ok_or_else(|| StoreError::not_found("assignment rule", id.as_str()))
    }

    /// Fetch a rule, soft-deleted or not.
    pub fn get(conn: &Connection, id: &RuleId) -> Result<Option<AssignmentRule>> {
        Ok(conn
            .query_row(
                "SELECT * FROM assignment_rules WHERE id = ?1",
                [id.as_str()],
                rule_from_row,
            )
            .optional()?)
    }

    /// Active, non-deleted rules. Order is not significant; callers sort.
    pub fn list_active(conn: &Connection) -> Result<Vec<AssignmentRule>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM assignment_rules WHERE status = 'active' AND deleted_at IS NULL",
        )?;
        let rows = stmt.query_map([], rule_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Change a rule's status.
    pub fn set_status(conn: &Connection, id: &RuleId, status: RuleStatus, now: &str) -> Result<()> {
        let changed = conn.execute(
            "UPDATE assignment_rules SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id.as_str(), status.as_sql(), now],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("assignment rule", id.as_str()));
        }
        Ok(())
    }

    /// Count one match of rule `id`; `assigned` also counts it as successful.
    pub fn record_match(conn: &Connection, id: &RuleId, assigned: bool, now: &str) -> Result<()> {
        let changed = conn.execute(
            "UPDATE assignment_rules
             SET total_assignments = total_assignments + 1,
                 successful_assignments = successful_assignments + ?2,
                 last_assignment_at = ?3
             WHERE id = ?1",
            params![id.as_str(), i64::from(assigned), now],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("assignment rule", id.as_str()));
        }
        Ok(())
    }

    /// Soft-delete a rule.
    pub fn soft_delete(conn: &Connection, id: &RuleId, now: &str) -> Result<()> {
        let changed = conn.execute(
            "UPDATE assignment_rules SET deleted_at = ?2, updated_at = ?2
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id.as_str(), now],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("assignment rule", id.as_str()));
        }
        Ok(())
    }
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<AssignmentRule> {
    let conditions: String = row.get("conditions")?;
    Ok(AssignmentRule {
        id: RuleId::from(row.get::<_, String>("id")?),
        name: row.get("name")?,
        description: row.get("description")?,
        priority: row.get("priority")?,
        status: enum_col(row, "status")?,
        is_default: row.get("is_default")?,
        conditions: ConditionSet::from_json_str(&conditions),
        candidate_user_ids: json_vec(row, "candidate_user_ids")?,
        fallback_user_id: row.get::<_, Option<String>>("fallback_user_id")?.map(UserId::from),
        business_hours_enabled: row.get("business_hours_enabled")?,
        business_hours_start: row.get("business_hours_start")?,
        business_hours_end: row.get("business_hours_end")?,
        working_days: json_vec(row, "working_days")?,
        timezone: row.get("timezone")?,
        max_assignments_per_hour: row.get("max_assignments_per_hour")?,
        max_assignments_per_day: row.get("max_assignments_per_day")?,
        total_assignments: row.get("total_assignments")?,
        successful_assignments: row.get("successful_assignments")?,
        last_assignment_at: row.get("last_assignment_at")?,
        created_by: row.get::<_, Option<String>>("created_by")?.map(UserId::from),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}
