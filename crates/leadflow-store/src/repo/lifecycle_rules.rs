use leadflow_core::{ContactStatus, RuleId, UserId};
use leadflow_rules::{ActionSet, ConditionSet, CriteriaSet};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{Result, StoreError};
use crate::repo::{enum_col, json_vec, to_json};
use crate::types::{NewScoringRule, NewTransitionRule, ScoringRule, TransitionRule};

// ─────────────────────────────────────────────────────────────────────────────
// Scoring rules
// ─────────────────────────────────────────────────────────────────────────────

/// Scoring rule administration and lookup.
pub struct ScoringRuleRepo;

impl ScoringRuleRepo {
    /// Create an active scoring rule.
    pub fn create(conn: &Connection, params: &NewScoringRule, now: &str) -> Result<ScoringRule> {
        let id = params.id.clone().unwrap_or_default();
        let _ = conn.execute(
            "INSERT INTO scoring_rules (id, name, description, category, applicable_when, criteria,
             base_score, max_score, priority, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)",
            params![
                id.as_str(),
                params.name,
                params.description,
                params.category.as_sql(),
                params.applicable_when.to_string(),
                params.criteria.to_string(),
                params.base_score,
                params.max_score,
                params.priority,
                now,
            ],
        )?;
        conn.query_row(
            "SELECT * FROM scoring_rules WHERE id = ?1",
            [id.as_str()],
            scoring_rule_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("scoring rule", id.as_str()))
    }

    /// Active scoring rules. Callers sort.
    pub fn list_active(conn: &Connection) -> Result<Vec<ScoringRule>> {
        let mut stmt = conn.prepare("SELECT * FROM scoring_rules WHERE is_active = 1")?;
        let rows = stmt.query_map([], scoring_rule_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count one contributing pass for each of `ids`.
    pub fn record_applied(conn: &Connection, ids: &[RuleId], now: &str) -> Result<()> {
        let mut stmt = conn.prepare(
            "UPDATE scoring_rules SET times_applied = times_applied + 1, last_applied_at = ?2
             WHERE id = ?1",
        )?;
        for id in ids {
            let _ = stmt.execute(params![id.as_str(), now])?;
        }
        Ok(())
    }

    /// Enable or disable a rule.
    pub fn set_active(conn: &Connection, id: &RuleId, active: bool, now: &str) -> Result<()> {
        let changed = conn.execute(
            "UPDATE scoring_rules SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), active, now],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("scoring rule", id.as_str()));
        }
        Ok(())
    }
}

fn scoring_rule_from_row(row: &Row<'_>) -> rusqlite::Result<ScoringRule> {
    let applicable_when: String = row.get("applicable_when")?;
    let criteria: String = row.get("criteria")?;
    Ok(ScoringRule {
        id: RuleId::from(row.get::<_, String>("id")?),
        name: row.get("name")?,
        description: row.get("description")?,
        category: enum_col(row, "category")?,
        applicable_when: ConditionSet::from_json_str(&applicable_when),
        criteria: CriteriaSet::from_json_str(&criteria),
        base_score: row.get("base_score")?,
        max_score: row.get("max_score")?,
        priority: row.get("priority")?,
        is_active: row.get("is_active")?,
        times_applied: row.get("times_applied")?,
        last_applied_at: row.get("last_applied_at")?,
        created_at: row.get("created_at")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Status transition rules
// ─────────────────────────────────────────────────────────────────────────────

/// Status transition rule administration and lookup.
pub struct TransitionRuleRepo;

impl TransitionRuleRepo {
    /// Create an active transition rule.
    pub fn create(conn: &Connection, params: &NewTransitionRule, now: &str) -> Result<TransitionRule> {
        let id = params.id.clone().unwrap_or_default();
        let _ = conn.execute(
            "INSERT INTO status_transition_rules (id, name, description, from_status, to_status,
             transition_type, conditions, required_score, days_in_status, actions, notify_users,
             priority, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13)",
            params![
                id.as_str(),
                params.name,
                params.description,
                params.from_status.as_sql(),
                params.to_status.as_sql(),
                params.transition_type.as_sql(),
                params.conditions.to_string(),
                params.required_score,
                params.days_in_status,
                params.actions.to_string(),
                to_json(&params.notify_users)?,
                params.priority,
                now,
            ],
        )?;
        conn.query_row(
            "SELECT * FROM status_transition_rules WHERE id = ?1",
            [id.as_str()],
            transition_rule_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("transition rule", id.as_str()))
    }

    /// Active rules leaving `from`. Callers sort.
    pub fn list_active_from(conn: &Connection, from: ContactStatus) -> Result<Vec<TransitionRule>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM status_transition_rules WHERE from_status = ?1 AND is_active = 1",
        )?;
        let rows = stmt.query_map([from.as_sql()], transition_rule_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Whether any active rule, of any type, declares the `from -> to` edge.
    pub fn pair_exists(conn: &Connection, from: ContactStatus, to: ContactStatus) -> Result<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM status_transition_rules
             WHERE from_status = ?1 AND to_status = ?2 AND is_active = 1)",
            params![from.as_sql(), to.as_sql()],
            |row| row.get(0),
        )?)
    }

    /// Enable or disable a rule.
    pub fn set_active(conn: &Connection, id: &RuleId, active: bool, now: &str) -> Result<()> {
        let changed = conn.execute(
            "UPDATE status_transition_rules SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), active, now],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("transition rule", id.as_str()));
        }
        Ok(())
    }
}

fn transition_rule_from_row(row: &Row<'_>) -> rusqlite::Result<TransitionRule> {
    let conditions: String = row.get("conditions")?;
    let actions: String = row.get("actions")?;
    Ok(TransitionRule {
        id: RuleId::from(row.get::<_, String>("id")?),
        name: row.get("name")?,
        description: row.get("description")?,
        from_status: enum_col(row, "from_status")?,
        to_status: enum_col(row, "to_status")?,
        transition_type: enum_col(row, "transition_type")?,
        conditions: ConditionSet::from_json_str(&conditions),
        required_score: row.get("required_score")?,
        days_in_status: row.get("days_in_status")?,
        actions: ActionSet::from_json_str(&actions),
        notify_users: json_vec::<UserId>(row, "notify_users")?,
        priority: row.get("priority")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}
