//! Contact attributes as condition inputs.

use chrono::{DateTime, Utc};
use leadflow_core::parse_ts;
use leadflow_rules::{FieldMap, FieldValue, field_map_from_json};
use leadflow_store::Contact;
use serde_json::{Map, Value};

/// Fields a rule can reference for `contact`, as of `now`.
///
/// Custom fields are exposed both as `custom.<key>` and, unless the name is
/// taken by a built-in field, as plain `<key>`. Null columns are absent, so a
/// condition on them fails.
pub fn contact_fields(contact: &Contact, now: DateTime<Utc>) -> FieldMap {
    let mut fields = FieldMap::new();
    let mut put = |name: &str, value: FieldValue| {
        let _ = fields.insert(name.to_owned(), value);
    };

    put("id", contact.id.as_str().into());
    put("name", contact.name.as_str().into());
    put("status", contact.status.as_sql().into());
    put("priority", contact.priority.as_sql().into());
    put("lead_score", contact.lead_score.into());
    put(
        "tags",
        FieldValue::List(contact.tags.iter().map(|t| t.as_str().into()).collect()),
    );
    for (name, value) in [
        ("email", &contact.email),
        ("company", &contact.company),
        ("country", &contact.country),
        ("source", &contact.source),
        ("lifecycle_stage", &contact.lifecycle_stage),
    ] {
        if let Some(value) = value {
            put(name, value.as_str().into());
        }
    }
    if let Some(owner) = &contact.assigned_to {
        put("assigned_to", owner.as_str().into());
    }
    if let Some(days) = days_since(&contact.status_entered_at, now) {
        put("days_in_status", days.into());
    }
    if let Some(days) = contact.last_activity_at.as_deref().and_then(|ts| days_since(ts, now)) {
        put("days_since_last_activity", days.into());
    }
    if let Some(days) = days_since(&contact.created_at, now) {
        put("days_since_created", days.into());
    }

    for (key, value) in field_map_from_json(&contact.custom_fields) {
        let _ = fields.insert(format!("custom.{key}"), value.clone());
        let _ = fields.entry(key).or_insert(value);
    }
    fields
}

/// Request context supplied by the caller.
pub fn context_fields(context: &Map<String, Value>) -> FieldMap {
    field_map_from_json(context)
}

/// Whole days elapsed since a stored timestamp; `None` if it does not parse.
pub fn days_since(ts: &str, now: DateTime<Utc>) -> Option<i64> {
    parse_ts(ts).ok().map(|at| (now - at).num_days())
}
