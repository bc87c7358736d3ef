//! Planner error types
//!
//! Error codes:
//! - STRATUS_QUERY_INVALID (REJECT)
//! - STRATUS_UNKNOWN_STAGE (REJECT)
//! - STRATUS_STAGE_CONFIG (REJECT)
//!
//! Every planner error is raised before any document is read.

use std::fmt;

use crate::expr::ExpressionError;

/// Severity levels for planner errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Client request rejected
    Reject,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
        }
    }
}

/// Planner-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerErrorCode {
    /// Pipeline is not an array of single-key stage objects
    StratusQueryInvalid,
    /// Stage name not recognized
    StratusUnknownStage,
    /// Stage parameters missing or malformed
    StratusStageConfig,
}

impl PlannerErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            PlannerErrorCode::StratusQueryInvalid => "STRATUS_QUERY_INVALID",
            PlannerErrorCode::StratusUnknownStage => "STRATUS_UNKNOWN_STAGE",
            PlannerErrorCode::StratusStageConfig => "STRATUS_STAGE_CONFIG",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Reject
    }
}

impl fmt::Display for PlannerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Planner error type with full context
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerError {
    code: PlannerErrorCode,
    message: String,
    /// Stage the error belongs to, e.g. `$bucket`
    stage: Option<String>,
}

impl PlannerError {
    /// Create a query invalid error
    pub fn query_invalid(reason: impl Into<String>) -> Self {
        Self {
            code: PlannerErrorCode::StratusQueryInvalid,
            message: reason.into(),
            stage: None,
        }
    }

    /// Create an unknown stage error
    pub fn unknown_stage(stage: impl Into<String>) -> Self {
        let s = stage.into();
        Self {
            code: PlannerErrorCode::StratusUnknownStage,
            message: format!("Unrecognized pipeline stage '{}'", s),
            stage: Some(s),
        }
    }

    /// Create a stage configuration error
    pub fn stage_config(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: PlannerErrorCode::StratusStageConfig,
            message: reason.into(),
            stage: Some(stage.into()),
        }
    }

    /// Wrap an expression parse failure inside `stage`
    pub fn expression(stage: impl Into<String>, err: ExpressionError) -> Self {
        Self::stage_config(stage, err.to_string())
    }

    pub fn code(&self) -> PlannerErrorCode {
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
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: ", self.code.severity(), self.code.code())?;
        match &self.stage {
            Some(stage) => write!(f, "{}: {}", stage, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for PlannerError {}

/// Result type for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PlannerErrorCode::StratusQueryInvalid.code(), "STRATUS_QUERY_INVALID");
        assert_eq!(PlannerErrorCode::StratusUnknownStage.code(), "STRATUS_UNKNOWN_STAGE");
        assert_eq!(PlannerErrorCode::StratusStageConfig.code(), "STRATUS_STAGE_CONFIG");
    }

    #[test]
    fn test_error_display() {
        let err = PlannerError::stage_config("$bucket", "boundaries must be strictly increasing");
        let display = format!("{}", err);
        assert!(display.starts_with("[REJECT] STRATUS_STAGE_CONFIG"));
        assert!(display.contains("$bucket"));
        assert_eq!(err.stage(), Some("$bucket"));
    }

    #[test]
    fn test_expression_errors_become_stage_config() {
        let err = PlannerError::expression("$group", ExpressionError::UnknownOperator("$nope".into()));
        assert_eq!(err.code(), PlannerErrorCode::StratusStageConfig);
        assert!(err.message().contains("$nope"));
    }
}
