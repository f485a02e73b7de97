//! Status Transition Engine.
//!
//! The lifecycle graph is exactly the set of `(from, to)` pairs declared by
//! active transition rules. Automatic evaluation looks at the rules leaving
//! the contact's current status in `(priority, id)` order and applies the
//! first automatic one that fires. It runs once per call: a transition that
//! makes another rule eligible waits for the next trigger.

use chrono::{DateTime, Utc};
use leadflow_core::{
    AssignmentStatus, ContactId, ContactStatus, EventId, LifecycleEventType, RuleId,
    TransitionType, UserId, format_ts,
};
use leadflow_rules::{FieldMap, TransitionAction, sort_rules};
use leadflow_store::{
    AuditRepo, Contact, ContactRepo, LifecycleEvent, NewLifecycleEvent, TransitionRule,
    TransitionRuleRepo,
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::assignment::{PerContactResult, release_assignment};
use crate::audit::event;
use crate::engine::LeadEngine;
use crate::errors::{EngineError, Result};
use crate::fields::{contact_fields, days_since};
use crate::notify::{NotificationKind, NotificationPayload};

/// A suggested rule whose conditions hold. Suggestions are never applied.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Suggestion {
    /// Rule.
    pub rule_id: RuleId,
    /// Rule name.
    pub name: String,
    /// Status it proposes.
    pub to_status: ContactStatus,
}

/// Result of [`LeadEngine::evaluate_transitions`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransitionOutcome {
    /// Contact.
    pub contact_id: ContactId,
    /// Whether a rule fired.
    pub applied: bool,
    /// Status before evaluation.
    pub from_status: ContactStatus,
    /// Status after, when applied.
    pub to_status: Option<ContactStatus>,
    /// Rule that fired.
    pub rule_id: Option<RuleId>,
    /// Suggested rules that would fire.
    pub suggestions: Vec<Suggestion>,
    /// The `status_change` event, when applied.
    pub event_id: Option<EventId>,
}

/// A committed manual status change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusChange {
    /// Contact.
    pub contact_id: ContactId,
    /// Previous status.
    pub from: ContactStatus,
    /// New status.
    pub to: ContactStatus,
    /// The `status_change` event.
    pub event_id: EventId,
}

struct Evaluated {
    outcome: TransitionOutcome,
    faults: Vec<EngineError>,
    notify_users: Vec<UserId>,
}

impl LeadEngine {
    /// Apply the first automatic transition rule that fires for
    /// `contact_id`, and report suggested rules that would.
    ///
    /// A rule fires when its conditions hold, the contact's score reaches
    /// `required_score` and it has spent `days_in_status` days in its status.
    #[instrument(skip_all, fields(contact_id = %contact_id))]
    pub fn evaluate_transitions(&self, contact_id: &ContactId) -> Result<TransitionOutcome> {
        let now = self.now();
        let at = format_ts(now);
        let evaluated = self.store().with_immediate_tx(|tx| -> Result<Evaluated> {
            let mut contact = ContactRepo::require(tx, contact_id)?;
            let mut rules = TransitionRuleRepo::list_active_from(tx, contact.status)?;
            sort_rules(&mut rules);

            let mut evaluated = Evaluated {
                outcome: TransitionOutcome {
                    contact_id: contact_id.clone(),
                    applied: false,
                    from_status: contact.status,
                    to_status: None,
                    rule_id: None,
                    suggestions: Vec::new(),
                    event_id: None,
                },
                faults: Vec::new(),
                notify_users: Vec::new(),
            };
            let Some((rule, actions)) = first_firing(&rules, &contact, now, &mut evaluated) else {
                return Ok(evaluated);
            };

            let logged = apply_transition(
                tx,
                &mut contact,
                rule.to_status,
                Some(&rule.id),
                actions,
                None,
                Some(&format!("rule {}", rule.name)),
                &at,
            )?;
            evaluated.outcome.applied = true;
            evaluated.outcome.to_status = Some(rule.to_status);
            evaluated.outcome.rule_id = Some(rule.id.clone());
            evaluated.outcome.event_id = Some(logged.id);
            evaluated.notify_users.clone_from(&rule.notify_users);
            Ok(evaluated)
        })?;

        for fault in &evaluated.faults {
            warn!(error = %fault, "malformed transition rule");
        }
        let outcome = evaluated.outcome;
        if let (Some(to), Some(rule_id)) = (outcome.to_status, &outcome.rule_id) {
            info!(from = %outcome.from_status, to = %to, rule_id = %rule_id, "status transitioned");
            self.notify(
                &evaluated.notify_users,
                &NotificationPayload {
                    kind: NotificationKind::StatusChanged,
                    contact_id: contact_id.clone(),
                    rule_id: Some(rule_id.clone()),
                    status: Some(to),
                    message: format!("contact {contact_id} moved from {} to {to}", outcome.from_status),
                },
            );
        } else {
            debug!(suggestions = outcome.suggestions.len(), "no transition fired");
        }
        Ok(outcome)
    }

    /// Move `contact_id` to `new_status` on behalf of `actor_id`.
    ///
    /// Unless `force` is set, an active rule of any type must declare the
    /// edge. The change is audited with the actor and `reason`.
    #[instrument(skip_all, fields(contact_id = %contact_id, to = %new_status, force))]
    pub fn change_status(
        &self,
        contact_id: &ContactId,
        new_status: ContactStatus,
        reason: &str,
        actor_id: &UserId,
        force: bool,
    ) -> Result<StatusChange> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::MissingReason);
        }
        let at = format_ts(self.now());
        let change = self.store().with_immediate_tx(|tx| -> Result<StatusChange> {
            let mut contact = ContactRepo::require(tx, contact_id)?;
            let from = contact.status;
            if from == new_status {
                return Err(EngineError::AlreadyInStatus {
                    contact_id: contact_id.clone(),
                    status: from,
                });
            }
            if !force && !TransitionRuleRepo::pair_exists(tx, from, new_status)? {
                return Err(EngineError::InvalidTransition { from, to: new_status });
            }
            let logged = apply_transition(
                tx,
                &mut contact,
                new_status,
                None,
                &[],
                Some(actor_id),
                Some(reason),
                &at,
            )?;
            Ok(StatusChange {
                contact_id: contact_id.clone(),
                from,
                to: new_status,
                event_id: logged.id,
            })
        })?;
        info!(from = %change.from, actor_id = %actor_id, "status changed manually");
        Ok(change)
    }

    /// [`change_status`](Self::change_status) for many contacts, each in its
    /// own transaction. Results follow input order.
    pub fn bulk_change_status(
        &self,
        contact_ids: &[ContactId],
        new_status: ContactStatus,
        reason: &str,
        actor_id: &UserId,
        force: bool,
    ) -> Result<Vec<PerContactResult<StatusChange>>> {
        if reason.trim().is_empty() {
            return Err(EngineError::MissingReason);
        }
        let results: Vec<_> = contact_ids
            .iter()
            .map(|contact_id| PerContactResult {
                contact_id: contact_id.clone(),
                outcome: self.change_status(contact_id, new_status, reason, actor_id, force),
            })
            .collect();
        let failed = results.iter().filter(|r| r.outcome.is_err()).count();
        info!(to = %new_status, total = results.len(), failed, "bulk status change finished");
        Ok(results)
    }
}

/// Walk `rules` until an automatic one fires, collecting suggestions and
/// malformed rules on the way.
fn first_firing<'r>(
    rules: &'r [TransitionRule],
    contact: &Contact,
    now: DateTime<Utc>,
    evaluated: &mut Evaluated,
) -> Option<(&'r TransitionRule, &'r [TransitionAction])> {
    let fields = contact_fields(contact, now);
    let no_context = FieldMap::new();
    let days_in_status = days_since(&contact.status_entered_at, now).unwrap_or(0);

    for rule in rules {
        if rule.transition_type == TransitionType::Manual {
            continue;
        }
        let actions = match rule.actions.actions() {
            Ok(actions) => actions,
            Err(err) => {
                evaluated.faults.push(EngineError::ConditionEvaluation {
                    rule_id: rule.id.clone(),
                    message: err.to_string(),
                });
                continue;
            }
        };
        let eval = rule.conditions.evaluate_detailed(&fields, &no_context);
        if !eval.faults.is_empty() {
            evaluated.faults.push(EngineError::ConditionEvaluation {
                rule_id: rule.id.clone(),
                message: eval.faults.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
            });
        }
        if !eval.matched
            || rule.required_score.is_some_and(|min| contact.lead_score < min)
            || rule.days_in_status.is_some_and(|min| days_in_status < min)
        {
            continue;
        }
        if rule.transition_type == TransitionType::Suggested {
            evaluated.outcome.suggestions.push(Suggestion {
                rule_id: rule.id.clone(),
                name: rule.name.clone(),
                to_status: rule.to_status,
            });
            continue;
        }
        return Some((rule, actions));
    }
    None
}

/// Write `to` and the rule's actions onto `contact`, save it and append the
/// `status_change` event, all on the caller's transaction.
#[allow(clippy::too_many_arguments)]
fn apply_transition(
    conn: &Connection,
    contact: &mut Contact,
    to: ContactStatus,
    rule_id: Option<&RuleId>,
    actions: &[TransitionAction],
    actor_id: Option<&UserId>,
    reason: Option<&str>,
    at: &str,
) -> Result<LifecycleEvent> {
    let from = contact.status;
    contact.status = to;
    at.clone_into(&mut contact.status_entered_at);
    match to {
        ContactStatus::Qualified if contact.qualified_at.is_none() => {
            contact.qualified_at = Some(at.to_owned());
        }
        ContactStatus::ClosedWon if contact.converted_at.is_none() => {
            contact.converted_at = Some(at.to_owned());
        }
        _ => {}
    }

    for action in actions {
        match action {
            TransitionAction::AddTag { tag } => {
                if !contact.tags.contains(tag) {
                    contact.tags.push(tag.clone());
                }
            }
            TransitionAction::RemoveTag { tag } => contact.tags.retain(|t| t != tag),
            TransitionAction::SetPriority { priority } => contact.priority = *priority,
            TransitionAction::SetCustomField { key, value } => {
                let _ = contact.custom_fields.insert(key.clone(), value.clone());
            }
            TransitionAction::ClearAssignment => {
                let _ = release_assignment(
                    conn,
                    contact,
                    AssignmentStatus::Unassigned,
                    actor_id,
                    Some("cleared by status transition"),
                    at,
                )?;
            }
        }
    }

    ContactRepo::save(conn, contact, at)?;
    let logged = AuditRepo::append_event(
        conn,
        &NewLifecycleEvent {
            from_status: Some(from),
            to_status: Some(to),
            rule_id: rule_id.cloned(),
            actor_id: actor_id.cloned(),
            reason: reason.map(str::to_owned),
            details: (!actions.is_empty()).then(|| json!({ "actions": actions })),
            ..event(&contact.id, LifecycleEventType::StatusChange, at)
        },
    )?;
    Ok(logged)
}
