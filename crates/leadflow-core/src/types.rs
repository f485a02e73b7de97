//! Shared enumerations with stable string spellings.
//!
//! Each enum serializes as `snake_case` in JSON and uses the same spelling in
//! SQL columns ([`as_sql`](ContactStatus::as_sql)), so a row written by the
//! store and a rule authored in JSON always agree on the value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Column/JSON spelling of this value.
            #[must_use]
            pub const fn as_sql(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CoreError::UnknownVariant {
                        kind: $kind,
                        value: other.to_owned(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_sql())
            }
        }
    };
}

string_enum! {
    /// Lifecycle status of a contact.
    ContactStatus, "contact status" {
        /// Freshly created, nobody has reached out yet.
        New => "new",
        /// First touch made.
        Contacted => "contacted",
        /// Confirmed as a sales opportunity.
        Qualified => "qualified",
        /// Proposal sent.
        Proposal => "proposal",
        /// Terms under negotiation.
        Negotiation => "negotiation",
        /// Deal won.
        ClosedWon => "closed_won",
        /// Deal lost.
        ClosedLost => "closed_lost",
        /// Paused by the owner.
        OnHold => "on_hold",
        /// Long-term nurture track.
        Nurturing => "nurturing",
    }
}

impl ContactStatus {
    /// Closed statuses are skipped by periodic sweeps.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::ClosedWon | Self::ClosedLost)
    }
}

string_enum! {
    /// Contact priority.
    #[derive(Default)]
    ContactPriority, "contact priority" {
        /// Low.
        Low => "low",
        /// Medium (default).
        #[default]
        Medium => "medium",
        /// High.
        High => "high",
        /// Urgent.
        Urgent => "urgent",
    }
}

string_enum! {
    /// State of a `contact_assignments` row.
    AssignmentStatus, "assignment status" {
        /// Assigned, not yet acknowledged by the owner.
        Active => "active",
        /// Acknowledged by the owner.
        Accepted => "accepted",
        /// Work finished; terminal.
        Completed => "completed",
        /// Superseded by an assignment to another user; terminal.
        Reassigned => "reassigned",
        /// Owner removed without replacement; terminal.
        Unassigned => "unassigned",
    }
}

impl AssignmentStatus {
    /// Open assignments count toward workload and block a second assignment.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::Accepted)
    }
}

string_enum! {
    /// Administrative status of an assignment rule.
    RuleStatus, "rule status" {
        /// Evaluated.
        Active => "active",
        /// Switched off.
        Inactive => "inactive",
        /// Temporarily switched off.
        Paused => "paused",
    }
}

string_enum! {
    /// Kind of an assignment history row.
    HistoryChangeType, "history change type" {
        /// A contact without an owner received one.
        Assigned => "assigned",
        /// Ownership moved from one user to another.
        Reassigned => "reassigned",
        /// Ownership removed.
        Unassigned => "unassigned",
        /// Owner acknowledged the assignment.
        Accepted => "accepted",
        /// Owner finished the assignment.
        Completed => "completed",
        /// Automatic assignment found nobody eligible.
        AssignmentFailed => "assignment_failed",
    }
}

string_enum! {
    /// Kind of a lifecycle event row.
    LifecycleEventType, "lifecycle event type" {
        /// A scoring pass ran.
        ScoreChange => "score_change",
        /// The contact's status moved.
        StatusChange => "status_change",
        /// Scoring moved the contact to another lifecycle stage.
        StageChange => "stage_change",
    }
}

string_enum! {
    /// How a status transition rule is applied.
    TransitionType, "transition type" {
        /// Applied by evaluation when it fires.
        Automatic => "automatic",
        /// Never applied by evaluation; only validates manual changes.
        Manual => "manual",
        /// Reported as a suggestion when it fires, never applied.
        Suggested => "suggested",
    }
}

string_enum! {
    /// Bucket a scoring rule contributes to.
    ScoreCategory, "score category" {
        /// Who the lead is.
        Demographic => "demographic",
        /// What the lead did.
        Behavioral => "behavioral",
        /// How the lead interacts.
        Engagement => "engagement",
        /// What the lead's company is.
        Firmographic => "firmographic",
        /// Anything else.
        Custom => "custom",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_round_trips_through_sql_spelling() {
        for status in ContactStatus::ALL {
            assert_eq!(status.as_sql().parse::<ContactStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn status_json_matches_sql() {
        let json = serde_json::to_string(&ContactStatus::ClosedWon).unwrap();
        assert_eq!(json, "\"closed_won\"");
        assert_eq!(ContactStatus::ClosedWon.as_sql(), "closed_won");
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_matches!(
            "won".parse::<ContactStatus>(),
            Err(CoreError::UnknownVariant { kind: "contact status", .. })
        );
    }

    #[test]
    fn open_assignment_states() {
        assert!(AssignmentStatus::Active.is_open());
        assert!(AssignmentStatus::Accepted.is_open());
        assert!(!AssignmentStatus::Completed.is_open());
        assert!(!AssignmentStatus::Reassigned.is_open());
        assert!(!AssignmentStatus::Unassigned.is_open());
    }

    #[test]
    fn closed_statuses() {
        assert!(ContactStatus::ClosedWon.is_closed());
        assert!(ContactStatus::ClosedLost.is_closed());
        assert!(!ContactStatus::OnHold.is_closed());
    }

    #[test]
    fn priority_defaults_to_medium() {
        assert_eq!(ContactPriority::default(), ContactPriority::Medium);
    }

    #[test]
    fn display_uses_sql_spelling() {
        assert_eq!(HistoryChangeType::AssignmentFailed.to_string(), "assignment_failed");
        assert_eq!(TransitionType::Suggested.to_string(), "suggested");
    }
}
