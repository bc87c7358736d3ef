//! Executor error types
//!
//! Error codes:
//! - STRATUS_EXPRESSION_FAILED (ERROR)
//! - STRATUS_STAGE_CONFIG (REJECT)
//! - STRATUS_DATA_SOURCE (ERROR)
//! - STRATUS_QUERY_TIMEOUT (ERROR)
//! - STRATUS_EXECUTION_FAILED (ERROR)
//!
//! Every executor error aborts the whole query; no partial result is
//! returned alongside it.

use std::fmt;

use crate::expr::{Expression, ExpressionError};
use crate::planner::PlannerError;
use crate::store::StoreError;

/// Severity levels for executor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Pipeline rejected before execution
    Reject,
    /// Query aborted
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Executor-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorCode {
    /// Expression evaluation hit an operand it cannot coerce
    StratusExpressionFailed,
    /// Pipeline failed validation
    StratusStageConfig,
    /// Referenced collection missing or unreadable
    StratusDataSource,
    /// Query exceeded its deadline
    StratusQueryTimeout,
    /// Any other fatal condition during execution
    StratusExecutionFailed,
}

impl ExecutorErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorErrorCode::StratusExpressionFailed => "STRATUS_EXPRESSION_FAILED",
            ExecutorErrorCode::StratusStageConfig => "STRATUS_STAGE_CONFIG",
            ExecutorErrorCode::StratusDataSource => "STRATUS_DATA_SOURCE",
            ExecutorErrorCode::StratusQueryTimeout => "STRATUS_QUERY_TIMEOUT",
            ExecutorErrorCode::StratusExecutionFailed => "STRATUS_EXECUTION_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ExecutorErrorCode::StratusStageConfig => Severity::Reject,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ExecutorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Executor error type with full context
#[derive(Debug, Clone)]
pub struct ExecutorError {
    code: ExecutorErrorCode,
    message: String,
    /// Stage that failed, if known
    stage: Option<String>,
}

impl ExecutorError {
    /// Wraps an expression failure with the stage and the expression text
    pub fn expression_failed(stage: &str, expr: &Expression, err: ExpressionError) -> Self {
        Self {
            code: ExecutorErrorCode::StratusExpressionFailed,
            message: format!("{} in {}", err, expr),
            stage: Some(stage.to_string()),
        }
    }

    pub fn stage_config(stage: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            code: ExecutorErrorCode::StratusStageConfig,
            message: reason.into(),
            stage: stage.map(String::from),
        }
    }

    /// Store failures are surfaced with their message unchanged
    pub fn data_source(err: StoreError) -> Self {
        Self {
            code: ExecutorErrorCode::StratusDataSource,
            message: err.to_string(),
            stage: None,
        }
    }

    pub fn query_timeout(limit_ms: u64) -> Self {
        Self {
            code: ExecutorErrorCode::StratusQueryTimeout,
            message: format!("Query exceeded its {} ms timeout", limit_ms),
            stage: None,
        }
    }

    pub fn execution_failed(stage: &str, reason: impl Into<String>) -> Self {
        Self {
            code: ExecutorErrorCode::StratusExecutionFailed,
            message: reason.into(),
            stage: Some(stage.to_string()),
        }
    }

    pub fn code(&self) -> ExecutorErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ExecutorErrorCode::StratusQueryTimeout
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: ", self.code.severity(), self.code.code())?;
        match &self.stage {
            Some(stage) => write!(f, "{}: {}", stage, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ExecutorError {}

impl From<PlannerError> for ExecutorError {
    fn from(err: PlannerError) -> Self {
        let message = match err.code() {
            crate::planner::PlannerErrorCode::StratusStageConfig => err.message().to_string(),
            other => format!("{}: {}", other.code(), err.message()),
        };
        Self::stage_config(err.stage(), message)
    }
}

impl From<StoreError> for ExecutorError {
    fn from(err: StoreError) -> Self {
        Self::data_source(err)
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ExecutorErrorCode::StratusExpressionFailed.code(), "STRATUS_EXPRESSION_FAILED");
        assert_eq!(ExecutorErrorCode::StratusDataSource.code(), "STRATUS_DATA_SOURCE");
        assert_eq!(ExecutorErrorCode::StratusQueryTimeout.code(), "STRATUS_QUERY_TIMEOUT");
        assert_eq!(ExecutorErrorCode::StratusExecutionFailed.code(), "STRATUS_EXECUTION_FAILED");
    }

    #[test]
    fn test_expression_failure_carries_stage_and_text() {
        let expr = Expression::Field("temperature_c".into());
        let err = ExecutorError::expression_failed(
            "$addFields",
            &expr,
            ExpressionError::type_mismatch("$add", "cannot add string and array"),
        );
        assert_eq!(err.stage(), Some("$addFields"));
        let display = format!("{}", err);
        assert!(display.starts_with("[ERROR] STRATUS_EXPRESSION_FAILED"));
        assert!(display.contains("$temperature_c"));
    }

    #[test]
    fn test_store_error_surfaces_verbatim() {
        let store_err = StoreError::CollectionNotFound("nope".into());
        let text = store_err.to_string();
        let err = ExecutorError::from(store_err);
        assert_eq!(err.code(), ExecutorErrorCode::StratusDataSource);
        assert_eq!(err.message(), text);
    }

    #[test]
    fn test_planner_error_becomes_stage_config() {
        let err = ExecutorError::from(PlannerError::stage_config("$bucket", "bad boundaries"));
        assert_eq!(err.code(), ExecutorErrorCode::StratusStageConfig);
        assert_eq!(err.severity(), Severity::Reject);
        assert_eq!(err.stage(), Some("$bucket"));
    }

    #[test]
    fn test_timeout() {
        let err = ExecutorError::query_timeout(50);
        assert!(err.is_timeout());
        assert!(err.message().contains("50 ms"));
    }
}
