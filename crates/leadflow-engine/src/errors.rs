//! Engine error taxonomy.
//!
//! Callers branch on the variant: [`EngineError::ConcurrentModification`] is
//! safe to retry, [`EngineError::NoEligibleAssignee`] needs a human, and the
//! rest describe a request that cannot succeed as made.

use leadflow_core::{ContactId, ContactStatus, CoreError, RuleId, UserId};
use leadflow_store::StoreError;
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The referenced rule does not exist.
    #[error("rule not found: {0}")]
    RuleNotFound(RuleId),

    /// The referenced contact does not exist.
    #[error("contact not found: {0}")]
    ContactNotFound(ContactId),

    /// The referenced user does not exist.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// The user exists but may not own contacts.
    #[error("user {0} is inactive")]
    UserInactive(UserId),

    /// Automatic assignment found nobody to route the contact to.
    #[error("no eligible assignee for contact {contact_id}: {}", reasons.join("; "))]
    NoEligibleAssignee {
        /// Contact left unassigned.
        contact_id: ContactId,
        /// Rule that matched, if any did.
        rule_id: Option<RuleId>,
        /// Why each candidate (or the rule set) was rejected.
        reasons: Vec<String>,
    },

    /// A user is at one of their caps.
    #[error("workload cap exceeded for {user_id}: {reason}")]
    WorkloadCapExceeded {
        /// User at capacity.
        user_id: UserId,
        /// Which cap, with the observed count.
        reason: String,
    },

    /// No active transition rule declares the requested edge.
    #[error("no active transition rule allows {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: ContactStatus,
        /// Requested status.
        to: ContactStatus,
    },

    /// The contact is already in the requested status.
    #[error("contact {contact_id} is already {status}")]
    AlreadyInStatus {
        /// Contact.
        contact_id: ContactId,
        /// Its status.
        status: ContactStatus,
    },

    /// The contact already has an open assignment (to this user, for manual
    /// assignment).
    #[error("contact {contact_id} is already assigned to {user_id}")]
    AlreadyAssigned {
        /// Contact.
        contact_id: ContactId,
        /// Current owner.
        user_id: UserId,
    },

    /// The contact has no open assignment.
    #[error("contact {0} has no open assignment")]
    NotAssigned(ContactId),

    /// Only the current owner may perform this action.
    #[error("user {user_id} is not the assignee of contact {contact_id}")]
    NotAssignee {
        /// Contact.
        contact_id: ContactId,
        /// User who tried.
        user_id: UserId,
    },

    /// The operation must carry a non-empty reason.
    #[error("a non-empty reason is required")]
    MissingReason,

    /// A concurrent writer changed the data first. Safe to retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// A stored rule could not be evaluated as written.
    #[error("malformed rule {rule_id}: {message}")]
    ConditionEvaluation {
        /// Rule at fault.
        rule_id: RuleId,
        /// Faults, joined.
        message: String,
    },

    /// Persisted data the engine cannot interpret.
    #[error("internal error: {0}")]
    Internal(String),

    /// Storage failure.
    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrentModification(message) => Self::ConcurrentModification(message),
            StoreError::NotFound { entity: "contact", id } => Self::ContactNotFound(id.into()),
            StoreError::NotFound { entity: "user", id } => Self::UserNotFound(id.into()),
            StoreError::NotFound {
                entity: "assignment rule" | "scoring rule" | "transition rule",
                id,
            } => Self::RuleNotFound(id.into()),
            other => Self::Store(other),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn concurrent_modification_is_retryable() {
        let err: EngineError = StoreError::ConcurrentModification("busy".into()).into();
        assert!(err.is_retryable());
        assert!(!EngineError::MissingReason.is_retryable());
    }

    #[test]
    fn not_found_maps_by_entity() {
        let err: EngineError = StoreError::not_found("contact", "contact-1").into();
        assert_matches!(err, EngineError::ContactNotFound(id) if id.as_str() == "contact-1");
        let err: EngineError = StoreError::not_found("user", "user-1").into();
        assert_matches!(err, EngineError::UserNotFound(_));
        let err: EngineError = StoreError::not_found("transition rule", "rule-1").into();
        assert_matches!(err, EngineError::RuleNotFound(_));
        let err: EngineError = StoreError::not_found("assignment", "asg-1").into();
        assert_matches!(err, EngineError::Store(_));
    }

    #[test]
    fn no_eligible_assignee_lists_reasons() {
        let err = EngineError::NoEligibleAssignee {
            contact_id: "contact-1".into(),
            rule_id: Some("rule-a".into()),
            reasons: vec!["user-7: open cap".into(), "no fallback".into()],
        };
        assert_eq!(
            err.to_string(),
            "no eligible assignee for contact contact-1: user-7: open cap; no fallback"
        );
    }
}
