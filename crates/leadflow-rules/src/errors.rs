//! Rule compilation errors.

use thiserror::Error;

/// A rule definition that cannot be compiled.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RuleError {
    /// Operator name not recognized.
    #[error("unknown operator {operator:?} on field {field:?}")]
    UnknownOperator {
        /// Field the condition reads.
        field: String,
        /// The unrecognized operator.
        operator: String,
    },

    /// Operand does not fit the operator (e.g. text for `greater_than`).
    #[error("invalid operand for {operator} on field {field:?}: {message}")]
    InvalidOperand {
        /// Field the condition reads.
        field: String,
        /// Operator in use.
        operator: &'static str,
        /// What was wrong.
        message: String,
    },

    /// The condition entry is not a `{field, operator, value}` object.
    #[error("malformed condition: {0}")]
    Malformed(String),

    /// A transition action entry could not be parsed.
    #[error("malformed action: {0}")]
    MalformedAction(String),

    /// A business-hours window could not be parsed.
    #[error("invalid business hours: {0}")]
    BusinessHours(String),
}

/// Result alias for rule compilation.
pub type Result<T> = std::result::Result<T, RuleError>;
