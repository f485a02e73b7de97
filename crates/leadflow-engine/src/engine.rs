//! The engine handle shared by every operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadflow_core::{Clock, SystemClock, UserId};
use leadflow_rules::Tz;
use leadflow_settings::LeadflowSettings;
use leadflow_store::Store;
use tracing::warn;

use crate::notify::{LogNotifier, NotificationPayload, Notifier};

/// Lead routing and lifecycle engine.
///
/// Holds no mutable state of its own: everything that matters for
/// correctness lives in the [`Store`]. Clones share the pool, clock and
/// notifier, so one engine can serve many threads.
#[derive(Clone)]
pub struct LeadEngine {
    store: Store,
    settings: Arc<LeadflowSettings>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    default_tz: Tz,
}

impl LeadEngine {
    /// Engine on the wall clock, logging notifications.
    pub fn new(store: Store, settings: LeadflowSettings) -> Self {
        let default_tz = parse_default_tz(&settings.assignment.default_timezone);
        Self {
            store,
            settings: Arc::new(settings),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            default_tz,
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the notification sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Backing store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Effective settings.
    pub fn settings(&self) -> &LeadflowSettings {
        &self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn default_tz(&self) -> Tz {
        self.default_tz
    }

    /// Best-effort delivery; failures are logged.
    pub(crate) fn notify(&self, user_ids: &[UserId], payload: &NotificationPayload) {
        if user_ids.is_empty() {
            return;
        }
        if let Err(err) = self.notifier.notify(user_ids, payload) {
            warn!(
                contact_id = %payload.contact_id,
                error = %err,
                "notification failed"
            );
        }
    }
}

fn parse_default_tz(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        warn!(timezone = name, "unknown default timezone, using UTC");
        Tz::UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{MockNotifier, NotificationKind, NotifyError};
    use leadflow_core::logging::capture_logs;
    use tracing::Level;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            kind: NotificationKind::Assigned,
            contact_id: "contact-1".into(),
            rule_id: None,
            status: None,
            message: "assigned".into(),
        }
    }

    #[test]
    fn default_timezone_falls_back_to_utc() {
        assert_eq!(parse_default_tz("Asia/Kolkata"), Tz::Asia__Kolkata);
        assert_eq!(parse_default_tz("Mars/Olympus"), Tz::UTC);
    }

    #[test]
    fn notifier_failure_is_logged_not_raised() {
        let (logs, _guard) = capture_logs();
        let mut mock = MockNotifier::new();
        let _ = mock
            .expect_notify()
            .times(1)
            .returning(|_, _| Err(NotifyError::Delivery("smtp down".into())));
        let engine = LeadEngine::new(Store::open_in_memory().unwrap(), LeadflowSettings::default())
            .with_notifier(Arc::new(mock));

        engine.notify(&["user-1".into()], &payload());
        assert!(logs.has_event(Level::WARN, "notification failed"));
    }

    #[test]
    fn no_recipients_skips_the_notifier() {
        let mut mock = MockNotifier::new();
        let _ = mock.expect_notify().times(0);
        let engine = LeadEngine::new(Store::open_in_memory().unwrap(), LeadflowSettings::default())
            .with_notifier(Arc::new(mock));
        engine.notify(&[], &payload());
    }
}
