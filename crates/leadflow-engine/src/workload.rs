//! Workload Tracker: open-assignment counts, trailing-window rate limits and
//! business-hour windows.
//!
//! Counts are read on the caller's connection. The assignment engine passes
//! its immediate transaction, so the read and the write that depends on it
//! are one unit of work.

use chrono::{DateTime, Duration, Utc};
use leadflow_core::{UserId, format_ts};
use leadflow_rules::{BusinessHours, RuleError, Tz};
use leadflow_store::{AssignmentRepo, AssignmentRule, User};
use rusqlite::Connection;
use serde::Serialize;

use crate::errors::{EngineError, Result};

/// A user's load at one instant, with the caps that apply to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Workload {
    /// User.
    pub user_id: UserId,
    /// Assignments in `active` or `accepted` state.
    pub open_count: i64,
    /// Assignments received in the trailing hour, which excludes its start.
    pub assigned_last_hour: i64,
    /// Assignments received in the trailing 24 hours.
    pub assigned_last_day: i64,
    /// The user's open-assignment cap.
    pub max_open: Option<i64>,
    /// The user's hourly cap.
    pub cap_per_hour: Option<i64>,
    /// The user's daily cap.
    pub cap_per_day: Option<i64>,
}

/// Caps a rule layers on top of the user's own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuleCaps {
    /// Hourly cap.
    pub per_hour: Option<i64>,
    /// Daily cap.
    pub per_day: Option<i64>,
}

impl From<&AssignmentRule> for RuleCaps {
    fn from(rule: &AssignmentRule) -> Self {
        Self {
            per_hour: rule.max_assignments_per_hour,
            per_day: rule.max_assignments_per_day,
        }
    }
}

impl RuleCaps {
    /// Tightest caps among `rules` that can route to `user_id`, as a
    /// candidate or as the fallback.
    pub fn for_user(rules: &[AssignmentRule], user_id: &UserId) -> Self {
        rules
            .iter()
            .filter(|r| r.candidate_user_ids.contains(user_id) || r.fallback_user_id.as_ref() == Some(user_id))
            .fold(Self::default(), |caps, rule| Self {
                per_hour: tighter(caps.per_hour, rule.max_assignments_per_hour),
                per_day: tighter(caps.per_day, rule.max_assignments_per_day),
            })
    }
}

impl Workload {
    /// Read `user`'s counts as of `now`.
    pub fn read(conn: &Connection, user: &User, now: DateTime<Utc>) -> Result<Self> {
        let hour_ago = format_ts(now - Duration::hours(1));
        let day_ago = format_ts(now - Duration::days(1));
        Ok(Self {
            user_id: user.id.clone(),
            open_count: AssignmentRepo::open_count(conn, &user.id)?,
            assigned_last_hour: AssignmentRepo::count_assigned_after(conn, &user.id, &hour_ago)?,
            assigned_last_day: AssignmentRepo::count_assigned_after(conn, &user.id, &day_ago)?,
            max_open: user.max_open_assignments,
            cap_per_hour: user.max_assignments_per_hour,
            cap_per_day: user.max_assignments_per_day,
        })
    }

    /// Check whether one more assignment fits under every applicable cap.
    ///
    /// The hourly and daily limits are the tighter of the user's and the
    /// rule's.
    pub fn check(&self, rule: RuleCaps) -> Result<()> {
        let mut exceeded = Vec::new();
        if let Some(cap) = self.max_open {
            if self.open_count >= cap {
                exceeded.push(format!("open assignments {}/{cap}", self.open_count));
            }
        }
        if let Some(cap) = tighter(self.cap_per_hour, rule.per_hour) {
            if self.assigned_last_hour >= cap {
                exceeded.push(format!("assignments in the last hour {}/{cap}", self.assigned_last_hour));
            }
        }
        if let Some(cap) = tighter(self.cap_per_day, rule.per_day) {
            if self.assigned_last_day >= cap {
                exceeded.push(format!("assignments in the last day {}/{cap}", self.assigned_last_day));
            }
        }
        if exceeded.is_empty() {
            Ok(())
        } else {
            Err(EngineError::WorkloadCapExceeded {
                user_id: self.user_id.clone(),
                reason: exceeded.join(", "),
            })
        }
    }
}

fn tighter(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// The rule's business-hour window, if it has one switched on.
pub fn rule_window(rule: &AssignmentRule, default_tz: Tz) -> std::result::Result<Option<BusinessHours>, RuleError> {
    if !rule.business_hours_enabled {
        return Ok(None);
    }
    let (Some(start), Some(end)) = (&rule.business_hours_start, &rule.business_hours_end) else {
        return Err(RuleError::BusinessHours(
            "business hours enabled without start and end".into(),
        ));
    };
    BusinessHours::parse(start, end, &rule.working_days, rule.timezone.as_deref(), default_tz).map(Some)
}
