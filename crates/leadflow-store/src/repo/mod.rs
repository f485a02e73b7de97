//! Stateless repositories.
//!
//! Every function takes a `&Connection` (a pooled connection or an open
//! transaction) and translates between Rust types and SQL. Callers decide the
//! transaction boundaries.

mod assignment_rules;
mod assignments;
mod audit;
mod contacts;
mod lifecycle_rules;
mod users;

pub use assignment_rules::AssignmentRuleRepo;
pub use assignments::AssignmentRepo;
pub use audit::AuditRepo;
pub use contacts::ContactRepo;
pub use lifecycle_rules::{ScoringRuleRepo, TransitionRuleRepo};
pub use users::UserRepo;

use std::str::FromStr;

use leadflow_core::CoreError;
use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

/// Read a text column into a vocabulary enum.
pub(crate) fn enum_col<T: FromStr<Err = CoreError>>(row: &Row<'_>, col: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Read an optional text column into a vocabulary enum.
pub(crate) fn opt_enum_col<T: FromStr<Err = CoreError>>(
    row: &Row<'_>,
    col: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read a JSON array column, treating unreadable content as empty.
pub(crate) fn json_vec<T: DeserializeOwned>(row: &Row<'_>, col: &str) -> rusqlite::Result<Vec<T>> {
    let raw: String = row.get(col)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

/// Read an optional JSON column.
pub(crate) fn opt_json(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(col)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

/// Encode a value for a JSON column.
pub(crate) fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> crate::errors::Result<String> {
    Ok(serde_json::to_string(value)?)
}
