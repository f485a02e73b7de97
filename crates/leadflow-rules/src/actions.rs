//! Side-effect actions attached to status transition rules.

use leadflow_core::ContactPriority;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RuleError;

/// One side effect applied together with a status change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransitionAction {
    /// Add a tag if absent.
    AddTag {
        /// Tag text.
        tag: String,
    },
    /// Remove a tag if present.
    RemoveTag {
        /// Tag text.
        tag: String,
    },
    /// Overwrite the contact priority.
    SetPriority {
        /// New priority.
        priority: ContactPriority,
    },
    /// Set one custom field.
    SetCustomField {
        /// Field key.
        key: String,
        /// New value.
        value: Value,
    },
    /// Close the open assignment, leaving the contact unowned.
    ClearAssignment,
}

/// The actions of one rule, parsed once on load.
///
/// A single bad entry invalidates the whole set.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionSet {
    raw: Value,
    parsed: Result<Vec<TransitionAction>, RuleError>,
}

impl Default for ActionSet {
    fn default() -> Self {
        Self {
            raw: Value::Array(Vec::new()),
            parsed: Ok(Vec::new()),
        }
    }
}

impl ActionSet {
    /// Parse a JSON array of actions. `null` means none.
    pub fn from_value(value: &Value) -> Self {
        let parsed = match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    serde_json::from_value::<TransitionAction>(item.clone())
                        .map_err(|e| RuleError::MalformedAction(format!("{item}: {e}")))
                })
                .collect(),
            other => Err(RuleError::MalformedAction(format!(
                "actions must be a JSON array, got {other}"
            ))),
        };
        Self {
            raw: if value.is_null() {
                Value::Array(Vec::new())
            } else {
                value.clone()
            },
            parsed,
        }
    }

    /// Parse stored JSON text.
    pub fn from_json_str(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(e) => Self {
                raw: Value::String(text.to_owned()),
                parsed: Err(RuleError::MalformedAction(format!("invalid JSON: {e}"))),
            },
        }
    }

    /// Build from typed actions.
    pub fn from_actions(actions: Vec<TransitionAction>) -> Self {
        let raw = serde_json::to_value(&actions).unwrap_or_else(|_| Value::Array(Vec::new()));
        Self {
            raw,
            parsed: Ok(actions),
        }
    }

    /// Parsed actions, or the reason they could not be parsed.
    pub fn actions(&self) -> Result<&[TransitionAction], &RuleError> {
        self.parsed.as_deref()
    }

    /// The original JSON.
    pub fn to_value(&self) -> Value {
        self.raw.clone()
    }
}

impl Serialize for ActionSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn parses_every_action_kind() {
        let set = ActionSet::from_value(&json!([
            {"type": "add_tag", "tag": "hot"},
            {"type": "remove_tag", "tag": "cold"},
            {"type": "set_priority", "priority": "high"},
            {"type": "set_custom_field", "key": "segment", "value": "enterprise"},
            {"type": "clear_assignment"}
        ]));
        let actions = set.actions().unwrap();
        assert_eq!(actions.len(), 5);
        assert_eq!(
            actions[2],
            TransitionAction::SetPriority {
                priority: ContactPriority::High
            }
        );
        assert_eq!(actions[4], TransitionAction::ClearAssignment);
    }

    #[test]
    fn one_bad_entry_invalidates_the_set() {
        let set = ActionSet::from_value(&json!([
            {"type": "add_tag", "tag": "hot"},
            {"type": "send_fax"}
        ]));
        assert_matches!(set.actions(), Err(RuleError::MalformedAction(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let set = ActionSet::from_value(&json!([{"type": "add_tag", "tag": "x", "color": "red"}]));
        assert!(set.actions().is_err());
    }

    #[test]
    fn null_and_empty_are_no_actions() {
        assert_eq!(ActionSet::from_value(&Value::Null).actions().unwrap().len(), 0);
        assert_eq!(ActionSet::from_json_str("[]").actions().unwrap().len(), 0);
        assert!(ActionSet::from_json_str("{oops").actions().is_err());
    }

    #[test]
    fn typed_actions_serialize_tagged() {
        let set = ActionSet::from_actions(vec![TransitionAction::AddTag { tag: "mql".into() }]);
        assert_eq!(set.to_value(), json!([{"type": "add_tag", "tag": "mql"}]));
    }
}
