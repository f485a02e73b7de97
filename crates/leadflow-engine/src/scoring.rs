//! Lead Scoring Engine.
//!
//! A rule whose `applicable_when` gate holds contributes
//! `base_score + Σ(score × weight)` over its matching criteria, capped to
//! `[0, rule.max_score]`, into its category bucket. The sum of all buckets is
//! clamped to `[0, scoring.maxScore]`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use leadflow_core::{ContactId, EventId, LifecycleEventType, RuleId, ScoreCategory, format_ts, parse_ts};
use leadflow_rules::{FieldMap, sort_rules};
use leadflow_store::{AuditRepo, Contact, ContactRepo, NewLifecycleEvent, ScoringRule, ScoringRuleRepo};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::audit::event;
use crate::engine::LeadEngine;
use crate::errors::{EngineError, Result};
use crate::fields::contact_fields;
use crate::transitions::TransitionOutcome;

/// What one rule added to the score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleContribution {
    /// Rule.
    pub rule_id: RuleId,
    /// Rule name at scoring time.
    pub name: String,
    /// Bucket.
    pub category: ScoreCategory,
    /// Points after the rule cap.
    pub points: i64,
    /// Names of the criteria that held.
    pub criteria: Vec<String>,
}

/// Stored explanation of a contact's score.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Points per category.
    pub categories: BTreeMap<ScoreCategory, i64>,
    /// Contributing rules, in evaluation order.
    pub rules: Vec<RuleContribution>,
    /// Sum before the global clamp.
    pub raw_total: i64,
    /// Final score.
    pub total: i64,
    /// Letter grade of `total`.
    pub grade: String,
    /// Lifecycle stage of `total`.
    pub stage: String,
}

/// Result of [`LeadEngine::score_contact`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreOutcome {
    /// Contact.
    pub contact_id: ContactId,
    /// True when the cooldown short-circuited the computation.
    pub skipped: bool,
    /// Score before this call.
    pub previous_score: i64,
    /// Score after this call.
    pub score: i64,
    /// Breakdown of `score`.
    pub breakdown: ScoreBreakdown,
    /// The `score_change` event, absent when skipped.
    pub event_id: Option<EventId>,
    /// The `stage_change` event, when the lifecycle stage moved.
    pub stage_event_id: Option<EventId>,
    /// Transition pass that followed the score, when enabled.
    pub transition: Option<TransitionOutcome>,
}

/// Score `fields` against `rules`, which must already be in evaluation order.
///
/// Rules with malformed conditions or criteria contribute nothing and come
/// back as one error each; the rest are still applied.
pub fn compute_score(
    rules: &[ScoringRule],
    fields: &FieldMap,
    max_score: i64,
) -> (ScoreBreakdown, Vec<EngineError>) {
    let no_context = FieldMap::new();
    let mut breakdown = ScoreBreakdown::default();
    let mut faults = Vec::new();

    for rule in rules {
        let broken: Vec<String> = rule
            .applicable_when
            .errors()
            .into_iter()
            .chain(rule.criteria.errors())
            .map(ToString::to_string)
            .collect();
        if !broken.is_empty() {
            faults.push(malformed(rule, &broken));
            continue;
        }

        let gate = rule.applicable_when.evaluate_detailed(fields, &no_context);
        let mut problems: Vec<String> = gate.faults.iter().map(ToString::to_string).collect();
        if !gate.matched {
            if !problems.is_empty() {
                faults.push(malformed(rule, &problems));
            }
            continue;
        }
        let eval = rule.criteria.evaluate(fields, &no_context);
        problems.extend(eval.faults.iter().map(ToString::to_string));
        if !problems.is_empty() {
            faults.push(malformed(rule, &problems));
        }

        #[allow(clippy::cast_precision_loss)]
        let raw = rule.base_score as f64 + eval.matched.iter().map(|c| c.points).sum::<f64>();
        let points = round_points(raw).clamp(0, rule.max_score.max(0));
        let bucket = breakdown.categories.entry(rule.category).or_default();
        *bucket = bucket.saturating_add(points);
        breakdown.raw_total = breakdown.raw_total.saturating_add(points);
        breakdown.rules.push(RuleContribution {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            category: rule.category,
            points,
            criteria: eval.matched.into_iter().map(|c| c.name).collect(),
        });
    }

    breakdown.total = breakdown.raw_total.clamp(0, max_score.max(0));
    breakdown.grade = grade_for(breakdown.total).to_owned();
    breakdown.stage = stage_for(breakdown.total).to_owned();
    (breakdown, faults)
}

#[allow(clippy::cast_possible_truncation)]
fn round_points(raw: f64) -> i64 {
    if raw.is_nan() { 0 } else { raw.round() as i64 }
}

fn malformed(rule: &ScoringRule, problems: &[String]) -> EngineError {
    EngineError::ConditionEvaluation {
        rule_id: rule.id.clone(),
        message: problems.join("; "),
    }
}

/// Letter grade: A from 90, B from 80, C from 70, D from 60, else F.
pub fn grade_for(score: i64) -> &'static str {
    match score {
        90.. => "A",
        80..=89 => "B",
        70..=79 => "C",
        60..=69 => "D",
        _ => "F",
    }
}

/// Lifecycle stage implied by a score.
pub fn stage_for(score: i64) -> &'static str {
    match score {
        80.. => "sales_qualified_lead",
        60..=79 => "marketing_qualified_lead",
        40..=59 => "prospect",
        20..=39 => "suspect",
        _ => "unknown",
    }
}

impl LeadEngine {
    /// Recompute and store the score of `contact_id`.
    ///
    /// Without `force`, a contact scored less than `rescoreCooldownSecs` ago
    /// is returned as stored with `skipped = true`. Every computed score
    /// writes one `score_change` event, unchanged scores included, followed
    /// by a `stage_change` event when the derived lifecycle stage moved.
    #[instrument(skip_all, fields(contact_id = %contact_id, force))]
    pub fn score_contact(
        &self,
        contact_id: &ContactId,
        force: bool,
        reason: Option<&str>,
    ) -> Result<ScoreOutcome> {
        let now = self.now();
        let at = format_ts(now);
        let max_score = self.settings().scoring.max_score;

        let (mut outcome, faults) = self
            .store()
            .with_immediate_tx(|tx| -> Result<(ScoreOutcome, Vec<EngineError>)> {
                let mut contact = ContactRepo::require(tx, contact_id)?;
                if !force {
                    if let Some(stored) = self.cooling_down(&contact, now) {
                        return Ok((stored, Vec::new()));
                    }
                }

                let mut rules = ScoringRuleRepo::list_active(tx)?;
                sort_rules(&mut rules);
                let (breakdown, faults) = compute_score(&rules, &contact_fields(&contact, now), max_score);
                let stored = serde_json::to_value(&breakdown)
                    .map_err(|e| EngineError::Internal(format!("serialize score breakdown: {e}")))?;

                let previous_score = contact.lead_score;
                let previous_stage = contact.lifecycle_stage.clone().unwrap_or_else(|| stage_for(0).to_owned());
                contact.lead_score = breakdown.total;
                contact.score_breakdown = Some(stored.clone());
                contact.lifecycle_stage = Some(breakdown.stage.clone());
                contact.last_scored_at = Some(at.clone());
                ContactRepo::save(tx, &mut contact, &at)?;

                let logged = AuditRepo::append_event(
                    tx,
                    &NewLifecycleEvent {
                        from_score: Some(previous_score),
                        to_score: Some(breakdown.total),
                        reason: reason.map(str::to_owned),
                        details: Some(json!({"breakdown": stored, "force": force})),
                        ..event(contact_id, LifecycleEventType::ScoreChange, &at)
                    },
                )?;
                let stage_event_id = if previous_stage == breakdown.stage {
                    None
                } else {
                    let moved = AuditRepo::append_event(
                        tx,
                        &NewLifecycleEvent {
                            from_score: Some(previous_score),
                            to_score: Some(breakdown.total),
                            reason: reason.map(str::to_owned),
                            details: Some(json!({"from_stage": previous_stage, "to_stage": breakdown.stage})),
                            ..event(contact_id, LifecycleEventType::StageChange, &at)
                        },
                    )?;
                    Some(moved.id)
                };

                let applied: Vec<RuleId> = breakdown
                    .rules
                    .iter()
                    .filter(|r| r.points > 0)
                    .map(|r| r.rule_id.clone())
                    .collect();
                ScoringRuleRepo::record_applied(tx, &applied, &at)?;

                Ok((
                    ScoreOutcome {
                        contact_id: contact_id.clone(),
                        skipped: false,
                        previous_score,
                        score: breakdown.total,
                        breakdown,
                        event_id: Some(logged.id),
                        stage_event_id,
                        transition: None,
                    },
                    faults,
                ))
            })?;

        for fault in &faults {
            warn!(error = %fault, "malformed scoring rule");
        }
        if outcome.skipped {
            debug!(score = outcome.score, "scored recently, skipping");
            return Ok(outcome);
        }
        info!(
            previous_score = outcome.previous_score,
            score = outcome.score,
            grade = %outcome.breakdown.grade,
            "contact scored"
        );
        if outcome.stage_event_id.is_some() {
            info!(stage = %outcome.breakdown.stage, "lifecycle stage changed");
        }

        if self.settings().scoring.evaluate_transitions_after_scoring {
            match self.evaluate_transitions(contact_id) {
                Ok(transition) => outcome.transition = Some(transition),
                Err(err) => warn!(error = %err, "transition pass after scoring failed"),
            }
        }
        Ok(outcome)
    }

    /// The stored outcome if `contact` is inside the rescore cooldown and its
    /// breakdown is readable.
    fn cooling_down(&self, contact: &Contact, now: DateTime<Utc>) -> Option<ScoreOutcome> {
        let cooldown = self.settings().scoring.rescore_cooldown_secs;
        let last = parse_ts(contact.last_scored_at.as_deref()?).ok()?;
        let elapsed = u64::try_from((now - last).num_seconds()).ok()?;
        if elapsed >= cooldown {
            return None;
        }
        let breakdown = serde_json::from_value(contact.score_breakdown.clone()?).ok()?;
        Some(ScoreOutcome {
            contact_id: contact.id.clone(),
            skipped: true,
            previous_score: contact.lead_score,
            score: contact.lead_score,
            breakdown,
            event_id: None,
            stage_event_id: None,
            transition: None,
        })
    }
}
