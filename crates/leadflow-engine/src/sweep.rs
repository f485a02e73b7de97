//! Batch rescoring and transition sweep.
//!
//! Contacts are processed concurrently and independently: each runs its
//! blocking SQLite work on the blocking pool, at most `sweepConcurrency` at a
//! time, and a failure is recorded against that contact only.

use std::sync::Arc;

use leadflow_core::{ContactId, ContactStatus};
use leadflow_store::ContactRepo;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::engine::LeadEngine;
use crate::errors::{EngineError, Result};

/// Which contacts to sweep and how.
#[derive(Clone, Debug, Default)]
pub struct SweepOptions {
    /// Explicit contacts; all non-closed contacts when `None`.
    pub contact_ids: Option<Vec<ContactId>>,
    /// Ignore the rescore cooldown.
    pub force: bool,
}

/// Outcome for one contact.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepItem {
    /// Contact.
    pub contact_id: ContactId,
    /// Score after the sweep, if scoring succeeded.
    pub score: Option<i64>,
    /// Scoring was skipped by the cooldown.
    pub skipped: bool,
    /// Status entered, if a transition fired.
    pub transitioned_to: Option<ContactStatus>,
    /// What went wrong.
    pub error: Option<String>,
}

impl SweepItem {
    fn new(contact_id: ContactId) -> Self {
        Self {
            contact_id,
            score: None,
            skipped: false,
            transitioned_to: None,
            error: None,
        }
    }
}

/// Summary of a sweep.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// Contacts attempted.
    pub processed: usize,
    /// Contacts without error.
    pub succeeded: usize,
    /// Contacts with an error.
    pub failed: usize,
    /// Per-contact outcomes, by contact ID.
    pub items: Vec<SweepItem>,
}

impl LeadEngine {
    /// Rescore and re-evaluate transitions for many contacts.
    #[instrument(skip_all, fields(force = options.force))]
    pub async fn sweep(&self, options: SweepOptions) -> Result<SweepReport> {
        let contact_ids = match options.contact_ids {
            Some(ids) => ids,
            None => {
                let engine = self.clone();
                tokio::task::spawn_blocking(move || -> Result<Vec<ContactId>> {
                    let conn = engine.store().conn()?;
                    Ok(ContactRepo::list_open_ids(&conn)?)
                })
                .await
                .map_err(|e| EngineError::Internal(format!("listing contacts failed: {e}")))??
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.settings().lifecycle.sweep_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for contact_id in contact_ids {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| EngineError::Internal(format!("sweep semaphore closed: {e}")))?;
            let engine = self.clone();
            let force = options.force;
            let _ = tasks.spawn(async move {
                let id = contact_id.clone();
                let joined = tokio::task::spawn_blocking(move || engine.sweep_one(&id, force)).await;
                drop(permit);
                joined.unwrap_or_else(|e| SweepItem {
                    error: Some(format!("sweep task failed: {e}")),
                    ..SweepItem::new(contact_id)
                })
            });
        }

        let mut items = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => items.push(item),
                Err(e) => warn!(error = %e, "sweep task panicked"),
            }
        }
        items.sort_by(|a, b| a.contact_id.as_str().cmp(b.contact_id.as_str()));

        let failed = items.iter().filter(|i| i.error.is_some()).count();
        let report = SweepReport {
            processed: items.len(),
            succeeded: items.len() - failed,
            failed,
            items,
        };
        info!(processed = report.processed, failed = report.failed, "sweep finished");
        Ok(report)
    }

    fn sweep_one(&self, contact_id: &ContactId, force: bool) -> SweepItem {
        let mut item = SweepItem::new(contact_id.clone());
        let outcome = match self.score_contact(contact_id, force, Some("sweep")) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(contact_id = %contact_id, error = %err, "sweep scoring failed");
                item.error = Some(err.to_string());
                return item;
            }
        };
        item.score = Some(outcome.score);
        item.skipped = outcome.skipped;

        let transition = match outcome.transition {
            Some(transition) => Ok(transition),
            None => self.evaluate_transitions(contact_id),
        };
        match transition {
            Ok(transition) => item.transitioned_to = transition.to_status,
            Err(err) => {
                warn!(contact_id = %contact_id, error = %err, "sweep transition failed");
                item.error = Some(err.to_string());
            }
        }
        item
    }
}
