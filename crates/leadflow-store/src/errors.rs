//! Error types for the store.
//!
//! `SQLite` failures are classified on conversion: lock contention and
//! violations of the one-open-assignment index become
//! [`StoreError::ConcurrentModification`], and writes rejected by the audit
//! triggers become [`StoreError::AppendOnly`].

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` error not covered by a more specific variant.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON column could not be encoded or decoded.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// A row that must exist does not.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Table-level entity name.
        entity: &'static str,
        /// Requested ID.
        id: String,
    },

    /// A concurrent writer got there first. Safe to retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Attempted to change an audit row.
    #[error("audit tables are append-only: {0}")]
    AppendOnly(String),

    /// Data in the database violates an invariant the code relies on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, message) = &err {
            let message = message.clone().unwrap_or_default();
            match code.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::ConcurrentModification(format!("database busy: {message}"));
                }
                ErrorCode::ConstraintViolation if message.contains("append-only") => {
                    return Self::AppendOnly(message);
                }
                ErrorCode::ConstraintViolation
                    if message.contains("contact_assignments.contact_id") =>
                {
                    return Self::ConcurrentModification(
                        "contact already has an open assignment".into(),
                    );
                }
                _ => {}
            }
        }
        Self::Sqlite(err)
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
