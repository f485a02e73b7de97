//! Notification seam.
//!
//! Notifications go out after the change they describe has committed.
//! Delivery is best-effort: a failing [`Notifier`] is logged and never rolls
//! anything back.

use leadflow_core::{ContactId, ContactStatus, RuleId, UserId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A contact received an owner.
    Assigned,
    /// A contact changed status.
    StatusChanged,
}

/// Event handed to a [`Notifier`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NotificationPayload {
    /// What happened.
    pub kind: NotificationKind,
    /// Contact concerned.
    pub contact_id: ContactId,
    /// Rule that caused it, if any.
    pub rule_id: Option<RuleId>,
    /// New status, for status changes.
    pub status: Option<ContactStatus>,
    /// Human-readable summary.
    pub message: String,
}

/// Delivery failure.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The receiving side is gone.
    #[error("notification channel closed")]
    ChannelClosed,
    /// Transport-specific failure.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Sends notifications to users.
///
/// Called synchronously after commit, so implementations must not block for
/// long; queue and return.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Notify `user_ids` about `payload`.
    fn notify(&self, user_ids: &[UserId], payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_ids: &[UserId], payload: &NotificationPayload) -> Result<(), NotifyError> {
        info!(
            kind = ?payload.kind,
            contact_id = %payload.contact_id,
            recipients = user_ids.len(),
            message = %payload.message,
            "notification"
        );
        Ok(())
    }
}

/// A notification as delivered through [`ChannelNotifier`].
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Recipients.
    pub user_ids: Vec<UserId>,
    /// Event.
    pub payload: NotificationPayload,
}

/// Forwards notifications into an unbounded tokio channel for an async
/// delivery worker.
#[derive(Clone, Debug)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    /// Create the notifier and the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, user_ids: &[UserId], payload: &NotificationPayload) -> Result<(), NotifyError> {
        self.tx
            .send(Notification {
                user_ids: user_ids.to_vec(),
                payload: payload.clone(),
            })
            .map_err(|_| NotifyError::ChannelClosed)
    }
}
