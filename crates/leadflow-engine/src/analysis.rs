//! Read-only scoring analysis: how far a contact is from qualifying and what
//! would raise its score. Nothing here writes.

use std::collections::BTreeMap;

use leadflow_core::{ContactId, ContactStatus, RuleId, ScoreCategory};
use leadflow_rules::{FieldMap, sort_rules};
use leadflow_store::{Contact, ContactRepo, ScoringRuleRepo};
use serde::Serialize;
use tracing::instrument;

use crate::engine::LeadEngine;
use crate::errors::Result;
use crate::fields::contact_fields;
use crate::scoring::{ScoreBreakdown, grade_for, stage_for};

/// Scoring analysis of one contact, built from its stored score.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreAnalysis {
    /// Contact.
    pub contact_id: ContactId,
    /// Stored score.
    pub score: i64,
    /// Letter grade of `score`.
    pub grade: String,
    /// Stored lifecycle stage, or the one `score` implies.
    pub stage: String,
    /// Current status.
    pub status: ContactStatus,
    /// Sum of the caps of every rule whose gate holds today.
    pub max_possible_score: i64,
    /// `score` as a share of `max_possible_score`, 0 when nothing applies.
    pub score_percentage: f64,
    /// Points per category from the last scoring pass.
    pub categories: BTreeMap<ScoreCategory, i64>,
    /// Rules whose gate holds, in evaluation order.
    pub applicable_rules: Vec<RuleId>,
    /// `qualified`, `pending` or `unqualified`.
    pub qualification: String,
    /// Suggested next step for the owner.
    pub next_action: String,
    /// Ways to raise the score.
    pub recommendations: Vec<String>,
    /// When the score was computed.
    pub last_scored_at: Option<String>,
}

/// Qualified from 60 points or once in `qualified`; pending from 40.
pub fn qualification_for(score: i64, status: ContactStatus) -> &'static str {
    if score >= 60 || status == ContactStatus::Qualified {
        "qualified"
    } else if score >= 40 {
        "pending"
    } else {
        "unqualified"
    }
}

/// Next step for a contact with `score` in `status`.
pub fn next_action_for(score: i64, status: ContactStatus) -> &'static str {
    match status {
        ContactStatus::New if score >= 80 => "qualify the lead and hand it to sales",
        ContactStatus::Contacted if score >= 60 => "schedule a demo or consultation",
        ContactStatus::New if score >= 40 => "make first contact by phone or email",
        ContactStatus::Qualified => "send a proposal or pricing",
        ContactStatus::Proposal => "follow up on the proposal",
        _ => "keep nurturing with targeted content",
    }
}

fn recommendations(contact: &Contact, categories: &BTreeMap<ScoreCategory, i64>) -> Vec<String> {
    let points = |category| categories.get(&category).copied().unwrap_or(0);
    let mut out = Vec::new();
    if points(ScoreCategory::Engagement) < 20 {
        out.push("increase engagement through email campaigns and content".to_owned());
    }
    if contact.company.as_deref().is_none_or(str::is_empty) {
        out.push("collect company information to improve firmographic scoring".to_owned());
    }
    if contact.email.as_deref().is_none_or(str::is_empty) {
        out.push("collect an email address".to_owned());
    }
    if points(ScoreCategory::Behavioral) < 15 {
        out.push("track site visits and downloads to improve behavioral scoring".to_owned());
    }
    if contact.lead_score < 40 {
        out.push("focus on nurturing to raise the overall score".to_owned());
    } else if contact.lead_score >= 60 {
        out.push("consider moving the lead into sales qualification".to_owned());
    }
    out
}

impl LeadEngine {
    /// Explain a contact's stored score against the active scoring rules.
    #[instrument(skip_all, fields(contact_id = %contact_id))]
    pub fn analyze_score(&self, contact_id: &ContactId) -> Result<ScoreAnalysis> {
        let now = self.now();
        let conn = self.store().conn()?;
        let contact = ContactRepo::require(&conn, contact_id)?;
        let mut rules = ScoringRuleRepo::list_active(&conn)?;
        drop(conn);
        sort_rules(&mut rules);

        let fields = contact_fields(&contact, now);
        let no_context = FieldMap::new();
        let mut max_possible_score = 0_i64;
        let mut applicable_rules = Vec::new();
        for rule in &rules {
            let gate = rule.applicable_when.evaluate_detailed(&fields, &no_context);
            if gate.matched && gate.faults.is_empty() && rule.criteria.is_valid() {
                max_possible_score = max_possible_score.saturating_add(rule.max_score.max(0));
                applicable_rules.push(rule.id.clone());
            }
        }

        let categories = contact
            .score_breakdown
            .clone()
            .and_then(|v| serde_json::from_value::<ScoreBreakdown>(v).ok())
            .map(|b| b.categories)
            .unwrap_or_default();
        let score = contact.lead_score;
        #[allow(clippy::cast_precision_loss)]
        let score_percentage = if max_possible_score > 0 {
            score as f64 / max_possible_score as f64 * 100.0
        } else {
            0.0
        };

        Ok(ScoreAnalysis {
            contact_id: contact.id.clone(),
            score,
            grade: grade_for(score).to_owned(),
            stage: contact
                .lifecycle_stage
                .clone()
                .unwrap_or_else(|| stage_for(score).to_owned()),
            status: contact.status,
            max_possible_score,
            score_percentage,
            recommendations: recommendations(&contact, &categories),
            categories,
            applicable_rules,
            qualification: qualification_for(score, contact.status).to_owned(),
            next_action: next_action_for(score, contact.status).to_owned(),
            last_scored_at: contact.last_scored_at.clone(),
        })
    }
}
