//! Expression errors
//!
//! Missing fields and division by zero are not errors: both evaluate to
//! Null. Everything here aborts the query that raised it.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("{op} expects {expected} argument(s), got {found}")]
    InvalidArity {
        op: String,
        expected: String,
        found: usize,
    },

    #[error("Invalid expression: {0}")]
    InvalidSyntax(String),

    #[error("{op}: unsupported operand type(s): {detail}")]
    TypeMismatch { op: String, detail: String },

    #[error("Undefined variable: $${0}")]
    UndefinedVariable(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("$switch found no matching branch and has no default")]
    NoMatchingBranch,
}

impl ExpressionError {
    pub fn syntax(reason: impl Into<String>) -> Self {
        ExpressionError::InvalidSyntax(reason.into())
    }

    pub fn type_mismatch(op: impl Into<String>, detail: impl Into<String>) -> Self {
        ExpressionError::TypeMismatch {
            op: op.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for expression parsing and evaluation
pub type ExprResult<T> = Result<T, ExpressionError>;
