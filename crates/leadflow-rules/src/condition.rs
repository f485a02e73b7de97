//! Condition compilation and evaluation.
//!
//! Rules are stored as JSON arrays of `{field, operator, value}` objects. They
//! are compiled once into [`ConditionSet`]s when a rule is loaded, and the
//! compiled form is evaluated as many times as needed.
//!
//! Evaluation never fails. A condition that could not be compiled, or whose
//! operand does not fit the resolved field, evaluates to `false` and is
//! reported as a [`ConditionFault`] so the caller can log it once.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::RuleError;
use crate::value::{FieldMap, FieldValue};

const EPSILON: f64 = 1e-9;

/// Comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Same value. Numbers compare numerically, text exactly.
    Equals,
    /// Present and not the same value.
    NotEquals,
    /// Case-insensitive substring, or list membership for list fields.
    Contains,
    /// Present and not `contains`.
    NotContains,
    /// Numeric `>`.
    GreaterThan,
    /// Numeric `<`.
    LessThan,
    /// Numeric `>=`.
    GreaterThanOrEqual,
    /// Numeric `<=`.
    LessThanOrEqual,
    /// Equal to one element of the operand list.
    In,
    /// Present and equal to no element of the operand list.
    NotIn,
}

impl Operator {
    /// Parse an operator name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "greater_than_or_equal" => Self::GreaterThanOrEqual,
            "less_than_or_equal" => Self::LessThanOrEqual,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            _ => return None,
        })
    }

    /// Stored spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::In => "in",
            Self::NotIn => "not_in",
        }
    }

    const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::LessThan | Self::GreaterThanOrEqual | Self::LessThanOrEqual
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled `{field, operator, value}` condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    field: String,
    operator: Operator,
    operand: FieldValue,
}

/// Why a condition evaluated to `false` without a clean comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionFault {
    /// The condition did not compile.
    Malformed(RuleError),
    /// The resolved field has a type the operator cannot compare.
    TypeMismatch {
        /// Field name.
        field: String,
        /// Operator in use.
        operator: Operator,
        /// Type actually found.
        found: &'static str,
    },
}

impl fmt::Display for ConditionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "{err}"),
            Self::TypeMismatch {
                field,
                operator,
                found,
            } => write!(f, "{operator} cannot compare field {field:?} of type {found}"),
        }
    }
}

/// Result of evaluating a [`ConditionSet`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Whether every condition held.
    pub matched: bool,
    /// Faults encountered; empty for well-formed rules over well-typed data.
    pub faults: Vec<ConditionFault>,
}

impl Condition {
    /// Compile one condition.
    pub fn compile(field: &str, operator: &str, value: &Value) -> Result<Self, RuleError> {
        if field.trim().is_empty() {
            return Err(RuleError::Malformed("condition field is empty".into()));
        }
        let op = Operator::parse(operator).ok_or_else(|| RuleError::UnknownOperator {
            field: field.to_owned(),
            operator: operator.to_owned(),
        })?;
        let invalid = |message: &str| RuleError::InvalidOperand {
            field: field.to_owned(),
            operator: op.as_str(),
            message: message.to_owned(),
        };

        let operand = match op {
            Operator::Equals | Operator::NotEquals => match FieldValue::from_json(value) {
                Some(FieldValue::List(_)) => return Err(invalid("expected a scalar, got a list")),
                Some(v) => v,
                None => return Err(invalid("expected a scalar")),
            },
            Operator::Contains | Operator::NotContains => match value {
                Value::String(s) => FieldValue::Text(s.to_lowercase()),
                Value::Number(n) => FieldValue::Text(n.to_string()),
                _ => return Err(invalid("expected text")),
            },
            op if op.is_numeric() => FieldValue::from_json(value)
                .and_then(|v| v.as_number())
                .map(FieldValue::Number)
                .ok_or_else(|| invalid("expected a number"))?,
            _ => match FieldValue::from_json(value) {
                Some(list @ FieldValue::List(_)) => list,
                _ => return Err(invalid("expected a list")),
            },
        };

        Ok(Self {
            field: field.to_owned(),
            operator: op,
            operand,
        })
    }

    /// Field this condition reads.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Operator in use.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Test against resolved values, failing closed.
    pub fn check(&self, entity: &FieldMap, context: &FieldMap) -> Result<bool, ConditionFault> {
        self.test(entity, context)
            .map_err(|found| ConditionFault::TypeMismatch {
                field: self.field.clone(),
                operator: self.operator,
                found,
            })
    }

    /// Test against resolved values. `Err` carries the mismatched type name.
    fn test(&self, entity: &FieldMap, context: &FieldMap) -> Result<bool, &'static str> {
        let Some(actual) = resolve(&self.field, entity, context) else {
            return Ok(false);
        };
        match self.operator {
            Operator::Equals => equals(actual, &self.operand),
            Operator::NotEquals => equals(actual, &self.operand).map(|eq| !eq),
            Operator::Contains => contains(actual, &self.operand),
            Operator::NotContains => contains(actual, &self.operand).map(|c| !c),
            Operator::In => member(actual, &self.operand),
            Operator::NotIn => member(actual, &self.operand).map(|m| !m),
            numeric => {
                let lhs = actual.as_number().ok_or(actual.type_name())?;
                let rhs = self.operand.as_number().ok_or(self.operand.type_name())?;
                Ok(match numeric {
                    Operator::GreaterThan => lhs > rhs,
                    Operator::LessThan => lhs < rhs,
                    Operator::GreaterThanOrEqual => lhs >= rhs || (lhs - rhs).abs() < EPSILON,
                    _ => lhs <= rhs || (lhs - rhs).abs() < EPSILON,
                })
            }
        }
    }
}

/// Context wins over entity fields.
fn resolve<'a>(field: &str, entity: &'a FieldMap, context: &'a FieldMap) -> Option<&'a FieldValue> {
    context.get(field).or_else(|| entity.get(field))
}

fn equals(actual: &FieldValue, expected: &FieldValue) -> Result<bool, &'static str> {
    match (actual, expected) {
        (FieldValue::Text(a), FieldValue::Text(b)) => Ok(a == b),
        (FieldValue::Bool(a), FieldValue::Bool(b)) => Ok(a == b),
        (FieldValue::List(_), _) => Err("list"),
        (a, b) if matches!(a, FieldValue::Number(_)) || matches!(b, FieldValue::Number(_)) => {
            match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Ok((x - y).abs() < EPSILON),
                _ => Err(a.type_name()),
            }
        }
        (a, _) => Err(a.type_name()),
    }
}

fn contains(actual: &FieldValue, needle: &FieldValue) -> Result<bool, &'static str> {
    let FieldValue::Text(needle) = needle else {
        return Err(needle.type_name());
    };
    match actual {
        FieldValue::Text(haystack) => Ok(haystack.to_lowercase().contains(needle.as_str())),
        FieldValue::List(items) => Ok(items.iter().any(|item| match item {
            FieldValue::Text(s) => s.to_lowercase() == *needle,
            other => other.to_string() == *needle,
        })),
        other => Err(other.type_name()),
    }
}

fn member(actual: &FieldValue, list: &FieldValue) -> Result<bool, &'static str> {
    let FieldValue::List(candidates) = list else {
        return Err(list.type_name());
    };
    let hit = |v: &FieldValue| candidates.iter().any(|c| equals(v, c).unwrap_or(false));
    match actual {
        FieldValue::List(items) => Ok(items.iter().any(hit)),
        scalar => Ok(hit(scalar)),
    }
}

/// An ANDed list of compiled conditions, plus the JSON it came from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionSet {
    raw: Vec<Value>,
    entries: Vec<Result<Condition, RuleError>>,
}

impl ConditionSet {
    /// The always-true set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile a JSON array of condition objects. `null` means no conditions.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::empty(),
            Value::Array(items) => Self {
                raw: items.clone(),
                entries: items.iter().map(compile_entry).collect(),
            },
            other => Self {
                raw: vec![other.clone()],
                entries: vec![Err(RuleError::Malformed(
                    "conditions must be a JSON array".into(),
                ))],
            },
        }
    }

    /// Compile from stored JSON text.
    pub fn from_json_str(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(e) => Self {
                raw: vec![Value::String(text.to_owned())],
                entries: vec![Err(RuleError::Malformed(format!("invalid JSON: {e}")))],
            },
        }
    }

    /// Compiled conditions, skipping malformed ones.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.entries.iter().filter_map(|e| e.as_ref().ok())
    }

    /// Compilation errors.
    pub fn errors(&self) -> Vec<&RuleError> {
        self.entries.iter().filter_map(|e| e.as_ref().err()).collect()
    }

    /// Whether every entry compiled.
    pub fn is_valid(&self) -> bool {
        self.entries.iter().all(Result::is_ok)
    }

    /// Whether there are no conditions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of conditions, malformed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The original JSON array.
    pub fn to_value(&self) -> Value {
        Value::Array(self.raw.clone())
    }

    /// Evaluate, returning only the verdict.
    pub fn evaluate(&self, entity: &FieldMap, context: &FieldMap) -> bool {
        self.evaluate_detailed(entity, context).matched
    }

    /// Evaluate, returning the verdict and every fault met on the way.
    ///
    /// Compilation faults are always reported. Evaluation stops comparing at
    /// the first condition that fails.
    pub fn evaluate_detailed(&self, entity: &FieldMap, context: &FieldMap) -> Evaluation {
        let mut eval = Evaluation {
            matched: true,
            faults: Vec::new(),
        };
        for entry in &self.entries {
            match entry {
                Err(err) => {
                    eval.matched = false;
                    eval.faults.push(ConditionFault::Malformed(err.clone()));
                }
                Ok(_) if !eval.matched => {}
                Ok(cond) => match cond.check(entity, context) {
                    Ok(true) => {}
                    Ok(false) => eval.matched = false,
                    Err(fault) => {
                        eval.matched = false;
                        eval.faults.push(fault);
                    }
                },
            }
        }
        eval
    }
}

fn compile_entry(item: &Value) -> Result<Condition, RuleError> {
    let Value::Object(obj) = item else {
        return Err(RuleError::Malformed(format!("expected an object, got {item}")));
    };
    let field = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| RuleError::Malformed("missing \"field\"".into()))?;
    let operator = obj
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| RuleError::Malformed(format!("missing \"operator\" on field {field:?}")))?;
    Condition::compile(field, operator, obj.get("value").unwrap_or(&Value::Null))
}

impl Serialize for ConditionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConditionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    fn set(value: Value) -> ConditionSet {
        ConditionSet::from_value(&value)
    }

    #[test]
    fn empty_set_matches_everything() {
        assert!(ConditionSet::empty().evaluate(&FieldMap::new(), &FieldMap::new()));
        assert!(set(json!(null)).evaluate(&FieldMap::new(), &FieldMap::new()));
    }

    #[test]
    fn equals_text_is_case_sensitive() {
        let c = set(json!([{"field": "country", "operator": "equals", "value": "IN"}]));
        assert!(c.evaluate(&fields(&[("country", "IN".into())]), &FieldMap::new()));
        assert!(!c.evaluate(&fields(&[("country", "in".into())]), &FieldMap::new()));
    }

    #[test]
    fn equals_numbers_across_representations() {
        let c = set(json!([{"field": "lead_score", "operator": "equals", "value": 50}]));
        assert!(c.evaluate(&fields(&[("lead_score", 50_i64.into())]), &FieldMap::new()));
        assert!(c.evaluate(&fields(&[("lead_score", "50".into())]), &FieldMap::new()));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let c = set(json!([{"field": "company", "operator": "contains", "value": "ACME"}]));
        assert!(c.evaluate(&fields(&[("company", "Big Acme Corp".into())]), &FieldMap::new()));
        assert!(!c.evaluate(&fields(&[("company", "Initech".into())]), &FieldMap::new()));
    }

    #[test]
    fn contains_on_list_checks_membership() {
        let c = set(json!([{"field": "tags", "operator": "contains", "value": "vip"}]));
        let tags = FieldValue::List(vec!["VIP".into(), "trial".into()]);
        assert!(c.evaluate(&fields(&[("tags", tags)]), &FieldMap::new()));
        let tags = FieldValue::List(vec!["vipish".into()]);
        assert!(!c.evaluate(&fields(&[("tags", tags)]), &FieldMap::new()));
    }

    #[test]
    fn numeric_comparisons() {
        let entity = fields(&[("lead_score", 49_i64.into())]);
        let gt = set(json!([{"field": "lead_score", "operator": "greater_than", "value": 49}]));
        let gte = set(json!([{"field": "lead_score", "operator": "greater_than_or_equal", "value": 49}]));
        let lt = set(json!([{"field": "lead_score", "operator": "less_than", "value": "50"}]));
        let lte = set(json!([{"field": "lead_score", "operator": "less_than_or_equal", "value": 48}]));
        assert!(!gt.evaluate(&entity, &FieldMap::new()));
        assert!(gte.evaluate(&entity, &FieldMap::new()));
        assert!(lt.evaluate(&entity, &FieldMap::new()));
        assert!(!lte.evaluate(&entity, &FieldMap::new()));
    }

    #[test]
    fn in_and_not_in() {
        let c_in = set(json!([{"field": "country", "operator": "in", "value": ["US", "CA"]}]));
        let c_not = set(json!([{"field": "country", "operator": "not_in", "value": ["US", "CA"]}]));
        let us = fields(&[("country", "US".into())]);
        let de = fields(&[("country", "DE".into())]);
        assert!(c_in.evaluate(&us, &FieldMap::new()));
        assert!(!c_in.evaluate(&de, &FieldMap::new()));
        assert!(!c_not.evaluate(&us, &FieldMap::new()));
        assert!(c_not.evaluate(&de, &FieldMap::new()));
    }

    #[test]
    fn negations_fail_closed_on_missing_field() {
        let c = set(json!([
            {"field": "country", "operator": "not_equals", "value": "US"}
        ]));
        assert!(!c.evaluate(&FieldMap::new(), &FieldMap::new()));
        let c = set(json!([{"field": "country", "operator": "not_in", "value": ["US"]}]));
        assert!(!c.evaluate(&FieldMap::new(), &FieldMap::new()));
    }

    #[test]
    fn context_overrides_entity() {
        let c = set(json!([{"field": "source", "operator": "equals", "value": "webhook"}]));
        let entity = fields(&[("source", "form".into())]);
        let ctx = fields(&[("source", "webhook".into())]);
        assert!(c.evaluate(&entity, &ctx));
        assert!(!c.evaluate(&entity, &FieldMap::new()));
    }

    #[test]
    fn conditions_are_anded() {
        let c = set(json!([
            {"field": "country", "operator": "equals", "value": "IN"},
            {"field": "lead_score", "operator": "greater_than", "value": 10}
        ]));
        let both = fields(&[("country", "IN".into()), ("lead_score", 20_i64.into())]);
        let one = fields(&[("country", "IN".into()), ("lead_score", 5_i64.into())]);
        assert!(c.evaluate(&both, &FieldMap::new()));
        assert!(!c.evaluate(&one, &FieldMap::new()));
    }

    #[test]
    fn unknown_operator_fails_closed_with_fault() {
        let c = set(json!([{"field": "country", "operator": "like", "value": "I%"}]));
        assert!(!c.is_valid());
        let eval = c.evaluate_detailed(&fields(&[("country", "IN".into())]), &FieldMap::new());
        assert!(!eval.matched);
        assert_matches!(
            eval.faults.as_slice(),
            [ConditionFault::Malformed(RuleError::UnknownOperator { .. })]
        );
    }

    #[test]
    fn malformed_operands_are_rejected_at_compile_time() {
        let c = set(json!([
            {"field": "lead_score", "operator": "greater_than", "value": "lots"},
            {"field": "country", "operator": "in", "value": "US"},
            {"field": "country", "operator": "equals", "value": ["US"]},
            {"field": "", "operator": "equals", "value": 1},
            "not an object"
        ]));
        assert_eq!(c.errors().len(), 5);
        assert_eq!(c.conditions().count(), 0);
    }

    #[test]
    fn non_array_and_bad_json_are_malformed() {
        assert!(!set(json!({"field": "x"})).is_valid());
        assert!(!ConditionSet::from_json_str("[{").is_valid());
        assert!(ConditionSet::from_json_str("[]").is_valid());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let c = set(json!([{"field": "company", "operator": "greater_than", "value": 3}]));
        let eval = c.evaluate_detailed(&fields(&[("company", "Acme".into())]), &FieldMap::new());
        assert!(!eval.matched);
        assert_matches!(
            eval.faults.as_slice(),
            [ConditionFault::TypeMismatch { found: "text", .. }]
        );
    }

    #[test]
    fn missing_field_is_not_a_fault() {
        let c = set(json!([{"field": "budget", "operator": "greater_than", "value": 3}]));
        let eval = c.evaluate_detailed(&FieldMap::new(), &FieldMap::new());
        assert!(!eval.matched);
        assert!(eval.faults.is_empty());
    }

    #[test]
    fn serializes_back_to_original_json() {
        let raw = json!([{"field": "country", "operator": "equals", "value": "IN"}]);
        let c: ConditionSet = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&c).unwrap(), raw);
        assert_eq!(c.to_value(), raw);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn evaluation_is_deterministic(score in -1000_i64..1000, threshold in -1000_i64..1000) {
                let c = set(json!([{"field": "lead_score", "operator": "greater_than", "value": threshold}]));
                let entity = fields(&[("lead_score", score.into())]);
                let first = c.evaluate_detailed(&entity, &FieldMap::new());
                let second = c.evaluate_detailed(&entity, &FieldMap::new());
                prop_assert_eq!(&first, &second);
                prop_assert_eq!(first.matched, score > threshold);
            }

            #[test]
            fn not_equals_is_complement_for_present_text(a in "[a-z]{0,6}", b in "[a-z]{0,6}") {
                let eq = set(json!([{"field": "f", "operator": "equals", "value": b.clone()}]));
                let ne = set(json!([{"field": "f", "operator": "not_equals", "value": b}]));
                let entity = fields(&[("f", a.into())]);
                prop_assert_ne!(eq.evaluate(&entity, &FieldMap::new()), ne.evaluate(&entity, &FieldMap::new()));
            }
        }
    }
}
