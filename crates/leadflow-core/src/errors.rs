//! Error types for the core vocabulary.

use thiserror::Error;

/// Errors raised while parsing shared vocabulary values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A string did not name any variant of the given enum.
    #[error("unknown {kind}: {value:?}")]
    UnknownVariant {
        /// The enum being parsed (e.g. `"contact status"`).
        kind: &'static str,
        /// The offending input.
        value: String,
    },

    /// A timestamp string was not valid RFC 3339.
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, CoreError>;
