//! Assignment Rule Engine.
//!
//! Automatic assignment runs one decision per call:
//! `Matching -> Selecting -> Assigned | Fallback | Failed`. Rules are tried in
//! `(priority, id)` order; the first whose conditions hold and whose
//! business-hour window is open wins. A default rule is consulted only when
//! no ordinary rule matched. Candidates over any cap are rejected; the least
//! loaded survivor wins, ties going to the lower user id. Every outcome,
//! failure included, leaves exactly one history row.
//!
//! The whole decision runs in one immediate transaction, so the workload
//! read and the assignment write cannot interleave with another writer.

use chrono::{DateTime, Utc};
use leadflow_core::{
    AssignmentStatus, ContactId, HistoryChangeType, HistoryId, RuleId, UserId, format_ts,
};
use leadflow_rules::{FieldMap, sort_rules};
use leadflow_store::{
    AssignmentRepo, AssignmentRule, AssignmentRuleRepo, AuditRepo, Contact, ContactAssignment,
    ContactRepo, NewAssignment, NewHistoryEntry, User, UserRepo,
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::audit::{history, rule_snapshot};
use crate::engine::LeadEngine;
use crate::errors::{EngineError, Result};
use crate::fields::{contact_fields, context_fields};
use crate::notify::{NotificationKind, NotificationPayload};
use crate::workload::{RuleCaps, Workload, rule_window};

/// A committed assignment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignmentResult {
    /// The new assignment row.
    pub assignment: ContactAssignment,
    /// Owner before this call, for reassignments.
    pub previous_owner: Option<UserId>,
    /// Deciding rule; `None` for manual assignment.
    pub rule_id: Option<RuleId>,
    /// Whether the rule's fallback user was chosen.
    pub used_fallback: bool,
    /// Capacity problem a manual assignment overrode.
    pub capacity_warning: Option<String>,
    /// The history row written.
    pub history_id: HistoryId,
}

/// Outcome of one item in a bulk operation.
#[derive(Debug)]
pub struct PerContactResult<T> {
    /// Contact.
    pub contact_id: ContactId,
    /// What happened to it.
    pub outcome: Result<T>,
}

/// A rule passed over during matching.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedRule {
    /// Rule.
    pub rule_id: RuleId,
    /// Why.
    pub reason: String,
}

/// A candidate that could not take the contact.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RejectedCandidate {
    /// Candidate.
    pub user_id: UserId,
    /// Why.
    pub reason: String,
    /// Whether this was the rule's fallback user.
    pub fallback: bool,
}

/// Decision trace stored in the history row of an automatic assignment.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DecisionTrace {
    /// Caller-supplied context.
    pub context: Map<String, Value>,
    /// Rules skipped for being malformed or outside business hours.
    pub rules_skipped: Vec<SkippedRule>,
    /// Rule that matched.
    pub matched_rule: Option<RuleId>,
    /// Whether it was the default rule.
    pub via_default_rule: bool,
    /// Candidates rejected, in the order they were considered.
    pub rejected: Vec<RejectedCandidate>,
    /// Chosen user.
    pub selected: Option<UserId>,
    /// Whether the chosen user is the fallback.
    pub used_fallback: bool,
}

impl DecisionTrace {
    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn reasons(&self) -> Vec<String> {
        self.rejected
            .iter()
            .map(|r| format!("{}: {}", r.user_id, r.reason))
            .collect()
    }
}

enum Decision {
    Assigned(Box<AssignmentResult>),
    Failed {
        rule_id: Option<RuleId>,
        reasons: Vec<String>,
    },
}

impl LeadEngine {
    /// Route `contact_id` to an owner using the active assignment rules.
    ///
    /// `context` holds request-time fields (e.g. `source = "webhook"`) that
    /// take precedence over the contact's own.
    ///
    /// Fails with [`EngineError::NoEligibleAssignee`] when no rule matches or
    /// the matching rule's pool and fallback are exhausted; that outcome is
    /// still recorded as an `assignment_failed` history row.
    #[instrument(skip_all, fields(contact_id = %contact_id))]
    pub fn assign_automatically(
        &self,
        contact_id: &ContactId,
        context: &Map<String, Value>,
    ) -> Result<AssignmentResult> {
        let now = self.now();
        let at = format_ts(now);
        let decision = self.store().with_immediate_tx(|tx| -> Result<Decision> {
            let mut contact = ContactRepo::require(tx, contact_id)?;
            if let Some(open) = AssignmentRepo::open_for_contact(tx, contact_id)? {
                return Err(EngineError::AlreadyAssigned {
                    contact_id: contact_id.clone(),
                    user_id: open.assigned_to,
                });
            }

            let mut rules = AssignmentRuleRepo::list_active(tx)?;
            sort_rules(&mut rules);
            let entity = contact_fields(&contact, now);
            let ctx = context_fields(context);
            let mut trace = DecisionTrace {
                context: context.clone(),
                ..DecisionTrace::default()
            };

            let Some(rule) = self.match_rule(&rules, &entity, &ctx, now, &mut trace) else {
                let reasons = vec!["no assignment rule matched".to_owned()];
                let _ = AuditRepo::append_history(
                    tx,
                    &NewHistoryEntry {
                        reason: Some(reasons[0].clone()),
                        decision: Some(trace.to_value()),
                        ..history(contact_id, HistoryChangeType::AssignmentFailed, &at)
                    },
                )?;
                return Ok(Decision::Failed {
                    rule_id: None,
                    reasons,
                });
            };

            let Some(user_id) = select_assignee(tx, rule, now, &mut trace)? else {
                let mut reasons = trace.reasons();
                if rule.candidate_user_ids.is_empty() {
                    reasons.push("candidate pool is empty".to_owned());
                }
                if rule.fallback_user_id.is_none() {
                    reasons.push("no fallback user configured".to_owned());
                }
                let _ = AuditRepo::append_history(
                    tx,
                    &NewHistoryEntry {
                        rule_id: Some(rule.id.clone()),
                        reason: Some("no eligible assignee".to_owned()),
                        rule_snapshot: Some(rule_snapshot(rule)),
                        decision: Some(trace.to_value()),
                        ..history(contact_id, HistoryChangeType::AssignmentFailed, &at)
                    },
                )?;
                AssignmentRuleRepo::record_match(tx, &rule.id, false, &at)?;
                return Ok(Decision::Failed {
                    rule_id: Some(rule.id.clone()),
                    reasons,
                });
            };

            let assignment = AssignmentRepo::insert(
                tx,
                &NewAssignment {
                    contact_id,
                    assigned_to: &user_id,
                    assigned_by: None,
                    rule_id: Some(&rule.id),
                    reason: Some(&format!("matched rule {}", rule.name)),
                    capacity_warning: None,
                    assigned_at: &at,
                },
            )?;
            contact.assigned_to = Some(user_id.clone());
            contact.assigned_at = Some(at.clone());
            ContactRepo::save(tx, &mut contact, &at)?;
            let entry = AuditRepo::append_history(
                tx,
                &NewHistoryEntry {
                    assignment_id: Some(assignment.id.clone()),
                    to_user_id: Some(user_id.clone()),
                    rule_id: Some(rule.id.clone()),
                    rule_snapshot: Some(rule_snapshot(rule)),
                    decision: Some(trace.to_value()),
                    ..history(contact_id, HistoryChangeType::Assigned, &at)
                },
            )?;
            AssignmentRuleRepo::record_match(tx, &rule.id, true, &at)?;
            Ok(Decision::Assigned(Box::new(AssignmentResult {
                assignment,
                previous_owner: None,
                rule_id: Some(rule.id.clone()),
                used_fallback: trace.used_fallback,
                capacity_warning: None,
                history_id: entry.id,
            })))
        })?;

        match decision {
            Decision::Assigned(result) => {
                info!(
                    user_id = %result.assignment.assigned_to,
                    rule_id = ?result.rule_id,
                    used_fallback = result.used_fallback,
                    "contact assigned"
                );
                self.notify_assignee(&result);
                Ok(*result)
            }
            Decision::Failed { rule_id, reasons } => {
                warn!(rule_id = ?rule_id, reasons = ?reasons, "no eligible assignee");
                Err(EngineError::NoEligibleAssignee {
                    contact_id: contact_id.clone(),
                    rule_id,
                    reasons,
                })
            }
        }
    }

    /// First matching rule whose window is open, or the first open default
    /// rule if none match.
    fn match_rule<'r>(
        &self,
        rules: &'r [AssignmentRule],
        entity: &FieldMap,
        ctx: &FieldMap,
        now: DateTime<Utc>,
        trace: &mut DecisionTrace,
    ) -> Option<&'r AssignmentRule> {
        let mut open_default = None;
        for rule in rules {
            let window = match rule_window(rule, self.default_tz()) {
                Ok(window) => window,
                Err(err) => {
                    self.report_malformed(rule, &err.to_string(), trace);
                    continue;
                }
            };
            let in_hours = window.as_ref().is_none_or(|w| w.contains(now));
            if rule.is_default {
                if open_default.is_none() {
                    if in_hours {
                        open_default = Some(rule);
                    } else {
                        skip_outside_hours(rule, trace);
                    }
                }
                continue;
            }
            let eval = rule.conditions.evaluate_detailed(entity, ctx);
            if !eval.faults.is_empty() {
                let message = eval
                    .faults
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                self.report_malformed(rule, &message, trace);
            }
            if !eval.matched {
                continue;
            }
            if !in_hours {
                skip_outside_hours(rule, trace);
                continue;
            }
            debug!(rule_id = %rule.id, priority = rule.priority, "rule matched");
            trace.matched_rule = Some(rule.id.clone());
            return Some(rule);
        }
        let rule = open_default?;
        debug!(rule_id = %rule.id, "no rule matched, using default rule");
        trace.matched_rule = Some(rule.id.clone());
        trace.via_default_rule = true;
        Some(rule)
    }

    fn report_malformed(&self, rule: &AssignmentRule, message: &str, trace: &mut DecisionTrace) {
        let err = EngineError::ConditionEvaluation {
            rule_id: rule.id.clone(),
            message: message.to_owned(),
        };
        warn!(rule_id = %rule.id, error = %err, "malformed assignment rule");
        trace.rules_skipped.push(SkippedRule {
            rule_id: rule.id.clone(),
            reason: format!("malformed: {message}"),
        });
    }

    /// Assign `contact_id` to `user_id` directly, bypassing rules.
    ///
    /// Capacity is checked for information only: an over-cap user still gets
    /// the contact, with the reason kept in `capacity_warning`. Besides the
    /// user's own caps, the tightest caps of any active rule routing to the
    /// user apply. A contact
    /// owned by someone else is reassigned in the same transaction.
    #[instrument(skip_all, fields(contact_id = %contact_id, user_id = %user_id))]
    pub fn assign_manually(
        &self,
        contact_id: &ContactId,
        user_id: &UserId,
        actor_id: &UserId,
        reason: Option<&str>,
    ) -> Result<AssignmentResult> {
        let now = self.now();
        let at = format_ts(now);
        let result = self.store().with_immediate_tx(|tx| -> Result<AssignmentResult> {
            let mut contact = ContactRepo::require(tx, contact_id)?;
            let user = require_active_user(tx, user_id)?;
            let open = AssignmentRepo::open_for_contact(tx, contact_id)?;
            if let Some(open) = &open {
                if open.assigned_to == *user_id {
                    return Err(EngineError::AlreadyAssigned {
                        contact_id: contact_id.clone(),
                        user_id: user_id.clone(),
                    });
                }
            }

            let rule_caps = RuleCaps::for_user(&AssignmentRuleRepo::list_active(tx)?, user_id);
            let capacity_warning = match Workload::read(tx, &user, now)?.check(rule_caps) {
                Ok(()) => None,
                Err(EngineError::WorkloadCapExceeded { reason, .. }) => {
                    warn!(reason = %reason, "manual assignment exceeds capacity");
                    Some(reason)
                }
                Err(other) => return Err(other),
            };

            let (change_type, previous_owner) = match &open {
                Some(open) => {
                    AssignmentRepo::close(tx, &open.id, AssignmentStatus::Reassigned, &at)?;
                    (HistoryChangeType::Reassigned, Some(open.assigned_to.clone()))
                }
                None => (HistoryChangeType::Assigned, None),
            };

            let assignment = AssignmentRepo::insert(
                tx,
                &NewAssignment {
                    contact_id,
                    assigned_to: user_id,
                    assigned_by: Some(actor_id),
                    rule_id: None,
                    reason,
                    capacity_warning: capacity_warning.as_deref(),
                    assigned_at: &at,
                },
            )?;
            contact.assigned_to = Some(user_id.clone());
            contact.assigned_at = Some(at.clone());
            ContactRepo::save(tx, &mut contact, &at)?;
            let entry = AuditRepo::append_history(
                tx,
                &NewHistoryEntry {
                    assignment_id: Some(assignment.id.clone()),
                    from_user_id: previous_owner.clone(),
                    to_user_id: Some(user_id.clone()),
                    actor_id: Some(actor_id.clone()),
                    reason: reason.map(str::to_owned),
                    decision: Some(json!({
                        "manual": true,
                        "capacity_warning": capacity_warning,
                    })),
                    ..history(contact_id, change_type, &at)
                },
            )?;
            Ok(AssignmentResult {
                assignment,
                previous_owner,
                rule_id: None,
                used_fallback: false,
                capacity_warning,
                history_id: entry.id,
            })
        })?;

        info!(
            previous_owner = ?result.previous_owner,
            capacity_warning = result.capacity_warning.is_some(),
            "contact assigned manually"
        );
        self.notify_assignee(&result);
        Ok(result)
    }

    /// Manually assign many contacts to one user.
    ///
    /// The user is validated once up front; after that each contact runs in
    /// its own transaction and a failure is reported for that contact only.
    pub fn bulk_assign(
        &self,
        contact_ids: &[ContactId],
        user_id: &UserId,
        actor_id: &UserId,
    ) -> Result<Vec<PerContactResult<AssignmentResult>>> {
        {
            let conn = self.store().conn()?;
            let _ = require_active_user(&conn, user_id)?;
        }
        let results: Vec<_> = contact_ids
            .iter()
            .map(|contact_id| PerContactResult {
                contact_id: contact_id.clone(),
                outcome: self.assign_manually(contact_id, user_id, actor_id, Some("bulk assignment")),
            })
            .collect();
        let failed = results.iter().filter(|r| r.outcome.is_err()).count();
        info!(user_id = %user_id, total = results.len(), failed, "bulk assignment finished");
        Ok(results)
    }

    /// Remove the owner of `contact_id`.
    #[instrument(skip_all, fields(contact_id = %contact_id))]
    pub fn unassign(&self, contact_id: &ContactId, actor_id: &UserId, reason: &str) -> Result<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::MissingReason);
        }
        let at = format_ts(self.now());
        let previous = self.store().with_immediate_tx(|tx| -> Result<UserId> {
            let mut contact = ContactRepo::require(tx, contact_id)?;
            let open = release_assignment(
                tx,
                &mut contact,
                AssignmentStatus::Unassigned,
                Some(actor_id),
                Some(reason),
                &at,
            )?
            .ok_or_else(|| EngineError::NotAssigned(contact_id.clone()))?;
            ContactRepo::save(tx, &mut contact, &at)?;
            Ok(open.assigned_to)
        })?;
        info!(previous_owner = %previous, "contact unassigned");
        Ok(())
    }

    /// The current owner acknowledges the assignment. Accepting twice is a
    /// no-op.
    #[instrument(skip_all, fields(contact_id = %contact_id, user_id = %user_id))]
    pub fn accept_assignment(&self, contact_id: &ContactId, user_id: &UserId) -> Result<ContactAssignment> {
        let at = format_ts(self.now());
        self.store().with_immediate_tx(|tx| -> Result<ContactAssignment> {
            let _ = ContactRepo::require(tx, contact_id)?;
            let open = AssignmentRepo::open_for_contact(tx, contact_id)?
                .ok_or_else(|| EngineError::NotAssigned(contact_id.clone()))?;
            if open.assigned_to != *user_id {
                return Err(EngineError::NotAssignee {
                    contact_id: contact_id.clone(),
                    user_id: user_id.clone(),
                });
            }
            if open.status == AssignmentStatus::Accepted {
                debug!("assignment already accepted");
                return Ok(open);
            }
            AssignmentRepo::accept(tx, &open.id, &at)?;
            let _ = AuditRepo::append_history(
                tx,
                &NewHistoryEntry {
                    assignment_id: Some(open.id.clone()),
                    to_user_id: Some(user_id.clone()),
                    actor_id: Some(user_id.clone()),
                    ..history(contact_id, HistoryChangeType::Accepted, &at)
                },
            )?;
            info!("assignment accepted");
            AssignmentRepo::get(tx, &open.id)?
                .ok_or_else(|| EngineError::Internal(format!("assignment {} vanished", open.id)))
        })
    }

    /// Close the open assignment as finished and clear the owner.
    #[instrument(skip_all, fields(contact_id = %contact_id))]
    pub fn complete_assignment(
        &self,
        contact_id: &ContactId,
        actor_id: &UserId,
        note: Option<&str>,
    ) -> Result<()> {
        let at = format_ts(self.now());
        self.store().with_immediate_tx(|tx| -> Result<()> {
            let mut contact = ContactRepo::require(tx, contact_id)?;
            let _ = release_assignment(
                tx,
                &mut contact,
                AssignmentStatus::Completed,
                Some(actor_id),
                note,
                &at,
            )?
            .ok_or_else(|| EngineError::NotAssigned(contact_id.clone()))?;
            ContactRepo::save(tx, &mut contact, &at)?;
            Ok(())
        })?;
        info!("assignment completed");
        Ok(())
    }

    /// Current load and caps of `user_id`.
    pub fn get_workload(&self, user_id: &UserId) -> Result<Workload> {
        let conn = self.store().conn()?;
        let user = UserRepo::get(&conn, user_id)?
            .ok_or_else(|| EngineError::UserNotFound(user_id.clone()))?;
        Workload::read(&conn, &user, self.now())
    }

    fn notify_assignee(&self, result: &AssignmentResult) {
        let assignment = &result.assignment;
        self.notify(
            std::slice::from_ref(&assignment.assigned_to),
            &NotificationPayload {
                kind: NotificationKind::Assigned,
                contact_id: assignment.contact_id.clone(),
                rule_id: result.rule_id.clone(),
                status: None,
                message: format!("contact {} assigned to you", assignment.contact_id),
            },
        );
    }
}

fn skip_outside_hours(rule: &AssignmentRule, trace: &mut DecisionTrace) {
    debug!(rule_id = %rule.id, "rule outside business hours");
    trace.rules_skipped.push(SkippedRule {
        rule_id: rule.id.clone(),
        reason: "outside business hours".to_owned(),
    });
}

/// Pick a candidate from `rule`'s pool, then its fallback.
fn select_assignee(
    conn: &Connection,
    rule: &AssignmentRule,
    now: DateTime<Utc>,
    trace: &mut DecisionTrace,
) -> Result<Option<UserId>> {
    let caps = RuleCaps::from(rule);
    let mut eligible: Vec<(i64, UserId)> = Vec::new();
    for user_id in &rule.candidate_user_ids {
        match eligibility(conn, user_id, caps, now)? {
            Ok(open_count) => eligible.push((open_count, user_id.clone())),
            Err(reason) => trace.rejected.push(RejectedCandidate {
                user_id: user_id.clone(),
                reason,
                fallback: false,
            }),
        }
    }
    if let Some((open_count, user_id)) = eligible.into_iter().min() {
        debug!(user_id = %user_id, open_count, "candidate selected");
        trace.selected = Some(user_id.clone());
        return Ok(Some(user_id));
    }

    let Some(fallback) = &rule.fallback_user_id else {
        return Ok(None);
    };
    match eligibility(conn, fallback, caps, now)? {
        Ok(_) => {
            debug!(user_id = %fallback, "pool exhausted, using fallback");
            trace.selected = Some(fallback.clone());
            trace.used_fallback = true;
            Ok(Some(fallback.clone()))
        }
        Err(reason) => {
            trace.rejected.push(RejectedCandidate {
                user_id: fallback.clone(),
                reason,
                fallback: true,
            });
            Ok(None)
        }
    }
}

/// `Ok(open_count)` if `user_id` can take one more contact, else the reason
/// they cannot.
fn eligibility(
    conn: &Connection,
    user_id: &UserId,
    caps: RuleCaps,
    now: DateTime<Utc>,
) -> Result<std::result::Result<i64, String>> {
    let Some(user) = UserRepo::get(conn, user_id)? else {
        return Ok(Err("unknown user".to_owned()));
    };
    if !user.is_active {
        return Ok(Err("inactive".to_owned()));
    }
    let load = Workload::read(conn, &user, now)?;
    match load.check(caps) {
        Ok(()) => Ok(Ok(load.open_count)),
        Err(EngineError::WorkloadCapExceeded { reason, .. }) => Ok(Err(reason)),
        Err(other) => Err(other),
    }
}

fn require_active_user(conn: &Connection, user_id: &UserId) -> Result<User> {
    let user = UserRepo::get(conn, user_id)?
        .ok_or_else(|| EngineError::UserNotFound(user_id.clone()))?;
    if !user.is_active {
        return Err(EngineError::UserInactive(user_id.clone()));
    }
    Ok(user)
}

/// Close the contact's open assignment into `status`, clear the owner on
/// `contact` (the caller saves it) and write the history row.
///
/// Returns the closed assignment, or `None` if there was nothing open.
pub(crate) fn release_assignment(
    conn: &Connection,
    contact: &mut Contact,
    status: AssignmentStatus,
    actor_id: Option<&UserId>,
    reason: Option<&str>,
    at: &str,
) -> Result<Option<ContactAssignment>> {
    let Some(open) = AssignmentRepo::open_for_contact(conn, &contact.id)? else {
        return Ok(None);
    };
    let change_type = match status {
        AssignmentStatus::Completed => HistoryChangeType::Completed,
        _ => HistoryChangeType::Unassigned,
    };
    AssignmentRepo::close(conn, &open.id, status, at)?;
    contact.assigned_to = None;
    contact.assigned_at = None;
    let _ = AuditRepo::append_history(
        conn,
        &NewHistoryEntry {
            assignment_id: Some(open.id.clone()),
            from_user_id: Some(open.assigned_to.clone()),
            actor_id: actor_id.cloned(),
            reason: reason.map(str::to_owned),
            ..history(&contact.id, change_type, at)
        },
    )?;
    Ok(Some(open))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MockNotifier;
    use crate::test_support::{Harness, uid};
    use assert_matches::assert_matches;
    use chrono::Duration;
    use leadflow_core::logging::capture_logs;
    use leadflow_settings::LeadflowSettings;
    use leadflow_store::{ConnectionConfig, NewAssignmentRule, Store};
    use tracing::Level;

    fn rule(id: &str, priority: i64, conditions: Value, pool: &[&str]) -> NewAssignmentRule {
        NewAssignmentRule {
            id: Some(id.into()),
            name: id.to_owned(),
            priority,
            conditions,
            candidate_user_ids: pool.iter().map(|u| uid(u)).collect(),
            ..NewAssignmentRule::default()
        }
    }

    fn country(code: &str) -> Value {
        json!([{"field": "country", "operator": "equals", "value": code}])
    }

    fn no_ctx() -> Map<String, Value> {
        Map::new()
    }

    #[test]
    fn lowest_priority_matching_rule_wins() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-2", |_| {});
        let _ = h.assignment_rule(rule("rule-b", 2, json!([]), &["user-2"]));
        let _ = h.assignment_rule(rule("rule-a", 1, country("IN"), &["user-1"]));

        let india = h.contact(|c| c.country = Some("IN".into()));
        let result = h.engine.assign_automatically(&india.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-a".into()));
        assert_eq!(result.assignment.assigned_to, uid("user-1"));

        let us = h.contact(|c| c.country = Some("US".into()));
        let result = h.engine.assign_automatically(&us.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-b".into()));
        assert_eq!(h.reload(&us.id).assigned_to, Some(uid("user-2")));
    }

    #[test]
    fn equal_priority_breaks_ties_by_rule_id() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-2", |_| {});
        let _ = h.assignment_rule(rule("rule-y", 5, json!([]), &["user-2"]));
        let _ = h.assignment_rule(rule("rule-x", 5, json!([]), &["user-1"]));
        let c = h.contact(|_| {});
        let result = h.engine.assign_automatically(&c.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-x".into()));
    }

    #[test]
    fn least_loaded_candidate_then_lowest_id() {
        let h = Harness::new();
        for u in ["user-1", "user-2", "user-3"] {
            let _ = h.user(u, |_| {});
        }
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &["user-3", "user-2", "user-1"]));
        let busy = h.contact(|_| {});
        let _ = h
            .engine
            .assign_manually(&busy.id, &uid("user-1"), &uid("admin"), None)
            .unwrap();

        let c = h.contact(|_| {});
        let result = h.engine.assign_automatically(&c.id, &no_ctx()).unwrap();
        assert_eq!(result.assignment.assigned_to, uid("user-2"));
    }

    #[test]
    fn context_overrides_contact_fields() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.assignment_rule(rule(
            "rule-hook",
            1,
            json!([{"field": "source", "operator": "equals", "value": "webhook"}]),
            &["user-1"],
        ));
        let c = h.contact(|c| c.source = Some("form".into()));
        let ctx = json!({"source": "webhook"}).as_object().cloned().unwrap();
        let result = h.engine.assign_automatically(&c.id, &ctx).unwrap();
        assert_eq!(result.rule_id, Some("rule-hook".into()));
    }

    #[test]
    fn capped_pool_falls_back_and_records_why() {
        let h = Harness::new();
        let _ = h.user("user-7", |u| u.max_open_assignments = Some(1));
        let _ = h.user("user-9", |_| {});
        let _ = h.assignment_rule(NewAssignmentRule {
            fallback_user_id: Some(uid("user-9")),
            ..rule("rule-a", 1, json!([]), &["user-7"])
        });
        let existing = h.contact(|_| {});
        let _ = h
            .engine
            .assign_manually(&existing.id, &uid("user-7"), &uid("admin"), None)
            .unwrap();

        let c = h.contact(|_| {});
        let result = h.engine.assign_automatically(&c.id, &no_ctx()).unwrap();
        assert_eq!(result.assignment.assigned_to, uid("user-9"));
        assert!(result.used_fallback);

        let history = h.history(&c.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, HistoryChangeType::Assigned);
        insta::assert_json_snapshot!(history[0].decision, @r#"
        {
          "context": {},
          "matched_rule": "rule-a",
          "rejected": [
            {
              "fallback": false,
              "reason": "open assignments 1/1",
              "user_id": "user-7"
            }
          ],
          "rules_skipped": [],
          "selected": "user-9",
          "used_fallback": true,
          "via_default_rule": false
        }
        "#);
        assert_eq!(
            history[0].rule_snapshot.as_ref().and_then(|s| s.get("id")),
            Some(&json!("rule-a"))
        );
    }

    #[test]
    fn exhausted_pool_without_fallback_is_reported_and_audited() {
        let h = Harness::new();
        let _ = h.user("user-7", |u| u.inactive = true);
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &["user-7", "user-8"]));
        let c = h.contact(|_| {});

        let err = h.engine.assign_automatically(&c.id, &no_ctx()).unwrap_err();
        assert_matches!(
            &err,
            EngineError::NoEligibleAssignee { rule_id: Some(rule_id), reasons, .. }
                if rule_id.as_str() == "rule-a"
                    && reasons == &vec![
                        "user-7: inactive".to_owned(),
                        "user-8: unknown user".to_owned(),
                        "no fallback user configured".to_owned(),
                    ]
        );
        assert!(!err.is_retryable());
        assert_eq!(h.reload(&c.id).assigned_to, None);

        let history = h.history(&c.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, HistoryChangeType::AssignmentFailed);
        assert_eq!(history[0].rule_id, Some("rule-a".into()));
    }

    #[test]
    fn empty_pool_without_fallback_cannot_succeed() {
        let h = Harness::new();
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &[]));
        let c = h.contact(|_| {});
        assert_matches!(
            h.engine.assign_automatically(&c.id, &no_ctx()),
            Err(EngineError::NoEligibleAssignee { reasons, .. })
                if reasons.contains(&"candidate pool is empty".to_owned())
        );
    }

    #[test]
    fn no_matching_rule_is_reported_and_audited() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.assignment_rule(rule("rule-a", 1, country("IN"), &["user-1"]));
        let c = h.contact(|c| c.country = Some("DE".into()));

        assert_matches!(
            h.engine.assign_automatically(&c.id, &no_ctx()),
            Err(EngineError::NoEligibleAssignee { rule_id: None, .. })
        );
        let history = h.history(&c.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, HistoryChangeType::AssignmentFailed);
        assert_eq!(history[0].rule_id, None);
    }

    #[test]
    fn default_rule_applies_only_when_nothing_matches() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-d", |_| {});
        let _ = h.assignment_rule(NewAssignmentRule {
            is_default: true,
            ..rule("rule-0-default", 0, country("XX"), &["user-d"])
        });
        let _ = h.assignment_rule(rule("rule-a", 1, country("IN"), &["user-1"]));

        let india = h.contact(|c| c.country = Some("IN".into()));
        let result = h.engine.assign_automatically(&india.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-a".into()));

        let other = h.contact(|c| c.country = Some("FR".into()));
        let result = h.engine.assign_automatically(&other.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-0-default".into()));
        assert_eq!(result.assignment.assigned_to, uid("user-d"));
        let decision = h.history(&other.id)[0].decision.clone().unwrap();
        assert_eq!(decision["via_default_rule"], json!(true));
    }

    #[test]
    fn rule_outside_business_hours_is_skipped() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-2", |_| {});
        // t0 is 09:00 UTC on a Monday, which is 14:30 in Kolkata.
        let _ = h.assignment_rule(NewAssignmentRule {
            business_hours_enabled: true,
            business_hours_start: Some("15:00".into()),
            business_hours_end: Some("18:00".into()),
            working_days: vec!["mon".into(), "tue".into()],
            timezone: Some("Asia/Kolkata".into()),
            ..rule("rule-a", 1, json!([]), &["user-1"])
        });
        let _ = h.assignment_rule(rule("rule-b", 2, json!([]), &["user-2"]));

        let early = h.contact(|_| {});
        let result = h.engine.assign_automatically(&early.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-b".into()));
        let decision = h.history(&early.id)[0].decision.clone().unwrap();
        assert_eq!(decision["rules_skipped"][0]["reason"], json!("outside business hours"));

        h.clock.advance(Duration::minutes(45));
        let later = h.contact(|_| {});
        let result = h.engine.assign_automatically(&later.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-a".into()));
    }

    #[test]
    fn malformed_rule_is_logged_once_and_skipped() {
        let (logs, _guard) = capture_logs();
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.assignment_rule(rule(
            "rule-bad",
            1,
            json!([{"field": "country", "operator": "near", "value": "IN"}, {"field": "x"}]),
            &["user-1"],
        ));
        let _ = h.assignment_rule(rule("rule-good", 2, json!([]), &["user-1"]));
        let c = h.contact(|_| {});

        let result = h.engine.assign_automatically(&c.id, &no_ctx()).unwrap();
        assert_eq!(result.rule_id, Some("rule-good".into()));
        assert_eq!(logs.count_matching(Level::WARN, "malformed assignment rule"), 1);
    }

    #[test]
    fn hourly_cap_blocks_until_window_rolls_over() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.assignment_rule(NewAssignmentRule {
            max_assignments_per_hour: Some(1),
            ..rule("rule-a", 1, json!([]), &["user-1"])
        });
        let first = h.contact(|_| {});
        let second = h.contact(|_| {});
        let _ = h.engine.assign_automatically(&first.id, &no_ctx()).unwrap();

        assert_matches!(
            h.engine.assign_automatically(&second.id, &no_ctx()),
            Err(EngineError::NoEligibleAssignee { reasons, .. })
                if reasons[0] == "user-1: assignments in the last hour 1/1"
        );

        h.clock.advance(Duration::minutes(59));
        assert_matches!(
            h.engine.assign_automatically(&second.id, &no_ctx()),
            Err(EngineError::NoEligibleAssignee { .. })
        );

        h.clock.advance(Duration::minutes(1));
        let result = h.engine.assign_automatically(&second.id, &no_ctx()).unwrap();
        assert_eq!(result.assignment.assigned_to, uid("user-1"));
    }

    #[test]
    fn manual_assignment_over_cap_succeeds_with_warning() {
        let (logs, _guard) = capture_logs();
        let h = Harness::new();
        let _ = h.user("user-1", |u| u.max_assignments_per_hour = Some(1));
        let first = h.contact(|_| {});
        let second = h.contact(|_| {});
        let ok = h
            .engine
            .assign_manually(&first.id, &uid("user-1"), &uid("admin"), None)
            .unwrap();
        assert_eq!(ok.capacity_warning, None);

        let over = h
            .engine
            .assign_manually(&second.id, &uid("user-1"), &uid("admin"), Some("vip"))
            .unwrap();
        assert_eq!(
            over.capacity_warning.as_deref(),
            Some("assignments in the last hour 1/1")
        );
        assert_eq!(over.assignment.capacity_warning, over.capacity_warning);
        let history = h.history(&second.id);
        assert_eq!(
            history[0].decision.as_ref().unwrap()["capacity_warning"],
            json!("assignments in the last hour 1/1")
        );
        assert_eq!(history[0].actor_id, Some(uid("admin")));
        assert!(logs.has_event(Level::WARN, "manual assignment exceeds capacity"));
    }

    #[test]
    fn manual_assignment_warns_on_rule_level_cap() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.assignment_rule(NewAssignmentRule {
            max_assignments_per_hour: Some(1),
            ..rule("rule-a", 1, json!([]), &["user-1"])
        });
        let first = h.contact(|_| {});
        let second = h.contact(|_| {});
        let third = h.contact(|_| {});
        let _ = h.engine.assign_automatically(&first.id, &no_ctx()).unwrap();
        assert_matches!(
            h.engine.assign_automatically(&second.id, &no_ctx()),
            Err(EngineError::NoEligibleAssignee { .. })
        );

        let over = h
            .engine
            .assign_manually(&third.id, &uid("user-1"), &uid("admin"), None)
            .unwrap();
        assert_eq!(
            over.capacity_warning.as_deref(),
            Some("assignments in the last hour 1/1")
        );
    }

    #[test]
    fn rule_statistics_follow_each_match() {
        let h = Harness::new();
        let _ = h.user("user-1", |u| u.max_open_assignments = Some(1));
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &["user-1"]));
        let first = h.contact(|_| {});
        let second = h.contact(|_| {});
        let _ = h.engine.assign_automatically(&first.id, &no_ctx()).unwrap();
        h.clock.advance(Duration::minutes(5));
        let _ = h.engine.assign_automatically(&second.id, &no_ctx()).unwrap_err();

        let conn = h.engine.store().conn().unwrap();
        let stats = AssignmentRuleRepo::get(&conn, &"rule-a".into()).unwrap().unwrap();
        assert_eq!(stats.total_assignments, 2);
        assert_eq!(stats.successful_assignments, 1);
        assert_eq!(stats.last_assignment_at, Some(h.now()));
    }

    #[test]
    fn manual_assignment_validates_user_and_owner() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-off", |u| u.inactive = true);
        let c = h.contact(|_| {});
        let admin = uid("admin");

        assert_matches!(
            h.engine.assign_manually(&c.id, &uid("ghost"), &admin, None),
            Err(EngineError::UserNotFound(_))
        );
        assert_matches!(
            h.engine.assign_manually(&c.id, &uid("user-off"), &admin, None),
            Err(EngineError::UserInactive(_))
        );
        assert_matches!(
            h.engine.assign_manually(&"contact-ghost".into(), &uid("user-1"), &admin, None),
            Err(EngineError::ContactNotFound(_))
        );
        let _ = h.engine.assign_manually(&c.id, &uid("user-1"), &admin, None).unwrap();
        assert_matches!(
            h.engine.assign_manually(&c.id, &uid("user-1"), &admin, None),
            Err(EngineError::AlreadyAssigned { .. })
        );
    }

    #[test]
    fn reassignment_closes_previous_row_in_one_step() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-2", |_| {});
        let c = h.contact(|_| {});
        let admin = uid("admin");
        let first = h.engine.assign_manually(&c.id, &uid("user-1"), &admin, None).unwrap();
        let second = h
            .engine
            .assign_manually(&c.id, &uid("user-2"), &admin, Some("territory change"))
            .unwrap();
        assert_eq!(second.previous_owner, Some(uid("user-1")));

        let trail = h.engine.contact_history(&c.id).unwrap();
        assert_eq!(trail.assignments.len(), 2);
        assert_eq!(trail.assignments[0].id, first.assignment.id);
        assert_eq!(trail.assignments[0].status, AssignmentStatus::Reassigned);
        assert_eq!(trail.assignments[1].status, AssignmentStatus::Active);

        assert_eq!(trail.history.len(), 2);
        let last = &trail.history[1];
        assert_eq!(last.change_type, HistoryChangeType::Reassigned);
        assert_eq!(last.from_user_id, Some(uid("user-1")));
        assert_eq!(last.to_user_id, Some(uid("user-2")));
        assert_eq!(last.reason.as_deref(), Some("territory change"));
    }

    #[test]
    fn automatic_assignment_of_owned_contact_is_rejected() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &["user-1"]));
        let c = h.contact(|_| {});
        let _ = h.engine.assign_automatically(&c.id, &no_ctx()).unwrap();
        assert_matches!(
            h.engine.assign_automatically(&c.id, &no_ctx()),
            Err(EngineError::AlreadyAssigned { user_id, .. }) if user_id == uid("user-1")
        );
        assert_eq!(h.history(&c.id).len(), 1);
    }

    #[test]
    fn bulk_assign_isolates_failures() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-off", |u| u.inactive = true);
        let c1 = h.contact(|_| {});
        let c3 = h.contact(|_| {});
        let ids = vec![c1.id.clone(), "contact-ghost".into(), c3.id.clone()];
        let admin = uid("admin");

        assert_matches!(
            h.engine.bulk_assign(&ids, &uid("user-off"), &admin),
            Err(EngineError::UserInactive(_))
        );

        let results = h.engine.bulk_assign(&ids, &uid("user-1"), &admin).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.is_ok());
        assert_matches!(results[1].outcome, Err(EngineError::ContactNotFound(_)));
        assert!(results[2].outcome.is_ok());
        assert_eq!(results[1].contact_id.as_str(), "contact-ghost");
    }

    #[test]
    fn unassign_requires_reason_and_owner() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let c = h.contact(|_| {});
        let admin = uid("admin");

        assert_matches!(h.engine.unassign(&c.id, &admin, "  "), Err(EngineError::MissingReason));
        assert_matches!(h.engine.unassign(&c.id, &admin, "cleanup"), Err(EngineError::NotAssigned(_)));

        let _ = h.engine.assign_manually(&c.id, &uid("user-1"), &admin, None).unwrap();
        h.engine.unassign(&c.id, &admin, "left the company").unwrap();

        let contact = h.reload(&c.id);
        assert_eq!(contact.assigned_to, None);
        assert_eq!(contact.assigned_at, None);
        let history = h.history(&c.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].change_type, HistoryChangeType::Unassigned);
        assert_eq!(history[1].from_user_id, Some(uid("user-1")));
        assert_eq!(history[1].reason.as_deref(), Some("left the company"));
        assert_eq!(h.engine.get_workload(&uid("user-1")).unwrap().open_count, 0);
    }

    #[test]
    fn accept_is_assignee_only_and_idempotent() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let _ = h.user("user-2", |_| {});
        let c = h.contact(|_| {});
        assert_matches!(
            h.engine.accept_assignment(&c.id, &uid("user-1")),
            Err(EngineError::NotAssigned(_))
        );
        let _ = h.engine.assign_manually(&c.id, &uid("user-1"), &uid("admin"), None).unwrap();

        assert_matches!(
            h.engine.accept_assignment(&c.id, &uid("user-2")),
            Err(EngineError::NotAssignee { .. })
        );
        let accepted = h.engine.accept_assignment(&c.id, &uid("user-1")).unwrap();
        assert_eq!(accepted.status, AssignmentStatus::Accepted);
        assert_eq!(accepted.accepted_at, Some(h.now()));
        let again = h.engine.accept_assignment(&c.id, &uid("user-1")).unwrap();
        assert_eq!(again, accepted);

        let accepted_rows = h
            .history(&c.id)
            .into_iter()
            .filter(|e| e.change_type == HistoryChangeType::Accepted)
            .count();
        assert_eq!(accepted_rows, 1);
        assert_eq!(h.engine.get_workload(&uid("user-1")).unwrap().open_count, 1);
    }

    #[test]
    fn complete_closes_and_clears_owner() {
        let h = Harness::new();
        let _ = h.user("user-1", |_| {});
        let c = h.contact(|_| {});
        let _ = h.engine.assign_manually(&c.id, &uid("user-1"), &uid("admin"), None).unwrap();
        h.engine
            .complete_assignment(&c.id, &uid("user-1"), Some("deal handed over"))
            .unwrap();

        assert_eq!(h.reload(&c.id).assigned_to, None);
        let trail = h.engine.contact_history(&c.id).unwrap();
        assert_eq!(trail.assignments[0].status, AssignmentStatus::Completed);
        assert!(trail.assignments[0].closed_at.is_some());
        assert_eq!(trail.history[1].change_type, HistoryChangeType::Completed);
        assert_matches!(
            h.engine.complete_assignment(&c.id, &uid("user-1"), None),
            Err(EngineError::NotAssigned(_))
        );
    }

    #[test]
    fn workload_reports_counts_and_caps() {
        let h = Harness::new();
        let _ = h.user("user-1", |u| {
            u.max_open_assignments = Some(10);
            u.max_assignments_per_day = Some(20);
        });
        for _ in 0..2 {
            let c = h.contact(|_| {});
            let _ = h.engine.assign_manually(&c.id, &uid("user-1"), &uid("admin"), None).unwrap();
        }
        let load = h.engine.get_workload(&uid("user-1")).unwrap();
        assert_eq!(load.open_count, 2);
        assert_eq!(load.assigned_last_hour, 2);
        assert_eq!(load.assigned_last_day, 2);
        assert_eq!(load.max_open, Some(10));
        assert_eq!(load.cap_per_hour, None);
        assert_eq!(load.cap_per_day, Some(20));
        assert_matches!(
            h.engine.get_workload(&uid("ghost")),
            Err(EngineError::UserNotFound(_))
        );
    }

    #[test]
    fn assignee_is_notified_after_commit() {
        let mut mock = MockNotifier::new();
        let _ = mock
            .expect_notify()
            .withf(|users, payload| {
                users == [uid("user-1")] && payload.kind == NotificationKind::Assigned
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let h = Harness::new().notifier(mock);
        let _ = h.user("user-1", |_| {});
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &["user-1"]));
        let c = h.contact(|_| {});
        let _ = h.engine.assign_automatically(&c.id, &no_ctx()).unwrap();
    }

    fn file_harness(dir: &tempfile::TempDir) -> Harness {
        let path = dir.path().join("race.db");
        let store = Store::open(
            path.to_str().unwrap(),
            &ConnectionConfig {
                pool_size: 8,
                busy_timeout_ms: 10_000,
            },
        )
        .unwrap();
        Harness::with_store(store, LeadflowSettings::default())
    }

    #[test]
    fn concurrent_automatic_assignment_of_one_contact_opens_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let h = file_harness(&dir);
        for u in ["user-1", "user-2"] {
            let _ = h.user(u, |_| {});
        }
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &["user-1", "user-2"]));
        let c = h.contact(|_| {});

        let outcomes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let engine = h.engine.clone();
                    let id = c.id.clone();
                    s.spawn(move || engine.assign_automatically(&id, &Map::new()))
                })
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        for outcome in outcomes.iter().filter_map(|o| o.as_ref().err()) {
            assert_matches!(
                outcome,
                EngineError::AlreadyAssigned { .. } | EngineError::ConcurrentModification(_)
            );
        }
        let trail = h.engine.contact_history(&c.id).unwrap();
        let open = trail.assignments.iter().filter(|a| a.status.is_open()).count();
        assert_eq!(open, 1);
    }

    #[test]
    fn concurrent_assignments_never_exceed_a_cap() {
        let dir = tempfile::tempdir().unwrap();
        let h = file_harness(&dir);
        let _ = h.user("user-1", |u| u.max_open_assignments = Some(2));
        let _ = h.assignment_rule(rule("rule-a", 1, json!([]), &["user-1"]));
        let contacts: Vec<_> = (0..6).map(|_| h.contact(|_| {}).id).collect();

        std::thread::scope(|s| {
            for id in &contacts {
                let engine = h.engine.clone();
                let _ = s.spawn(move || engine.assign_automatically(id, &Map::new()));
            }
        });

        assert_eq!(h.engine.get_workload(&uid("user-1")).unwrap().open_count, 2);
    }
}
