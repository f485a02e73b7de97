//! Weighted scoring criteria.

use serde::Serialize;
use serde_json::Value;

use crate::condition::{Condition, ConditionFault};
use crate::errors::RuleError;
use crate::value::FieldMap;

/// One `{name, field, operator, value, score, weight}` criterion.
#[derive(Clone, Debug, PartialEq)]
pub struct Criterion {
    /// Display name; defaults to the field name.
    pub name: String,
    /// Compiled test.
    pub condition: Condition,
    /// Points when the test holds.
    pub score: f64,
    /// Multiplier applied to `score`; defaults to 1.
    pub weight: f64,
}

impl Criterion {
    /// Points this criterion adds when it holds.
    pub fn points(&self) -> f64 {
        self.score * self.weight
    }
}

/// Criteria of one scoring rule, compiled on load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CriteriaSet {
    raw: Vec<Value>,
    entries: Vec<Result<Criterion, RuleError>>,
}

/// A criterion that held during evaluation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchedCriterion {
    /// Criterion name.
    pub name: String,
    /// Points contributed (`score * weight`).
    pub points: f64,
}

/// Outcome of [`CriteriaSet::evaluate`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CriteriaEvaluation {
    /// Criteria that held.
    pub matched: Vec<MatchedCriterion>,
    /// Faults met on the way.
    pub faults: Vec<ConditionFault>,
}

impl CriteriaSet {
    /// Compile a JSON array of criterion objects.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::Array(items) => Self {
                raw: items.clone(),
                entries: items.iter().map(compile_criterion).collect(),
            },
            other => Self {
                raw: vec![other.clone()],
                entries: vec![Err(RuleError::Malformed("criteria must be a JSON array".into()))],
            },
        }
    }

    /// Compile stored JSON text.
    pub fn from_json_str(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(e) => Self {
                raw: vec![Value::String(text.to_owned())],
                entries: vec![Err(RuleError::Malformed(format!("invalid JSON: {e}")))],
            },
        }
    }

    /// Compilation errors.
    pub fn errors(&self) -> Vec<&RuleError> {
        self.entries.iter().filter_map(|e| e.as_ref().err()).collect()
    }

    /// Whether every criterion compiled.
    pub fn is_valid(&self) -> bool {
        self.entries.iter().all(Result::is_ok)
    }

    /// The original JSON array.
    pub fn to_value(&self) -> Value {
        Value::Array(self.raw.clone())
    }

    /// Criteria that hold for the given fields, in declaration order.
    ///
    /// Malformed criteria never hold; they come back as faults alongside any
    /// type mismatches.
    pub fn evaluate(&self, entity: &FieldMap, context: &FieldMap) -> CriteriaEvaluation {
        let mut eval = CriteriaEvaluation::default();
        for entry in &self.entries {
            match entry {
                Err(err) => eval.faults.push(ConditionFault::Malformed(err.clone())),
                Ok(c) => match c.condition.check(entity, context) {
                    Ok(true) => eval.matched.push(MatchedCriterion {
                        name: c.name.clone(),
                        points: c.points(),
                    }),
                    Ok(false) => {}
                    Err(fault) => eval.faults.push(fault),
                },
            }
        }
        eval
    }
}

impl Serialize for CriteriaSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

fn compile_criterion(item: &Value) -> Result<Criterion, RuleError> {
    let Value::Object(obj) = item else {
        return Err(RuleError::Malformed(format!("expected a criterion object, got {item}")));
    };
    let field = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| RuleError::Malformed("criterion missing \"field\"".into()))?;
    let operator = obj
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| RuleError::Malformed(format!("criterion on {field:?} missing \"operator\"")))?;
    let condition = Condition::compile(field, operator, obj.get("value").unwrap_or(&Value::Null))?;
    let score = obj
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| RuleError::Malformed(format!("criterion on {field:?} missing numeric \"score\"")))?;
    let weight = match obj.get("weight") {
        None | Some(Value::Null) => 1.0,
        Some(w) => w
            .as_f64()
            .ok_or_else(|| RuleError::Malformed(format!("criterion on {field:?} has non-numeric \"weight\"")))?,
    };
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(field)
        .to_owned();
    Ok(Criterion {
        name,
        condition,
        score,
        weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;
    use serde_json::json;

    #[test]
    fn matching_reports_weighted_points() {
        let set = CriteriaSet::from_value(&json!([
            {"name": "enterprise", "field": "company_size", "operator": "greater_than", "value": 500, "score": 20, "weight": 1.5},
            {"field": "country", "operator": "equals", "value": "US", "score": 10}
        ]));
        assert!(set.is_valid());

        let mut entity = FieldMap::new();
        let _ = entity.insert("company_size".into(), FieldValue::Number(1000.0));
        let _ = entity.insert("country".into(), FieldValue::from("US"));

        let eval = set.evaluate(&entity, &FieldMap::new());
        assert!(eval.faults.is_empty());
        assert_eq!(
            eval.matched,
            vec![
                MatchedCriterion { name: "enterprise".into(), points: 30.0 },
                MatchedCriterion { name: "country".into(), points: 10.0 },
            ]
        );
    }

    #[test]
    fn malformed_criteria_are_recorded_and_never_match() {
        let set = CriteriaSet::from_value(&json!([
            {"field": "country", "operator": "equals", "value": "US"},
            {"field": "country", "operator": "equals", "value": "US", "score": 5, "weight": "heavy"},
            {"field": "country", "operator": "sounds_like", "value": "US", "score": 5}
        ]));
        assert_eq!(set.errors().len(), 3);

        let mut entity = FieldMap::new();
        let _ = entity.insert("country".into(), FieldValue::from("US"));
        let eval = set.evaluate(&entity, &FieldMap::new());
        assert!(eval.matched.is_empty());
        assert_eq!(eval.faults.len(), 3);
    }

    #[test]
    fn round_trips_raw_json() {
        let raw = json!([{"field": "x", "operator": "equals", "value": 1, "score": 2}]);
        assert_eq!(CriteriaSet::from_value(&raw).to_value(), raw);
        assert!(!CriteriaSet::from_json_str("nope").is_valid());
    }
}
