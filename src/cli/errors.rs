//! CLI-specific error types
//!
//! All CLI errors are fatal. Query and plan failures keep the engine's own
//! code so callers see `STRATUS_DATA_SOURCE`, `STRATUS_STAGE_CONFIG`, etc.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::executor::{ExecutorError, ExecutorErrorCode};
use crate::planner::{PlannerError, PlannerErrorCode};

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (files, stdin/stdout)
    IoError,
    /// Pipeline rejected by the planner
    Plan(PlannerErrorCode),
    /// Query aborted by the executor
    Query(ExecutorErrorCode),
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "STRATUS_CLI_CONFIG_ERROR",
            Self::IoError => "STRATUS_CLI_IO_ERROR",
            Self::Plan(code) => code.code(),
            Self::Query(code) => code.code(),
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

impl From<PlannerError> for CliError {
    fn from(e: PlannerError) -> Self {
        Self::new(CliErrorCode::Plan(e.code()), with_stage(e.stage(), e.message()))
    }
}

impl From<ExecutorError> for CliError {
    fn from(e: ExecutorError) -> Self {
        Self::new(CliErrorCode::Query(e.code()), with_stage(e.stage(), e.message()))
    }
}

fn with_stage(stage: Option<&str>, message: &str) -> String {
    match stage {
        Some(stage) => format!("{}: {}", stage, message),
        None => message.to_string(),
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(CliError::config_error("x").code_str(), "STRATUS_CLI_CONFIG_ERROR");
        assert_eq!(CliError::io_error("x").code_str(), "STRATUS_CLI_IO_ERROR");
    }

    #[test]
    fn test_engine_codes_pass_through() {
        let err: CliError = ExecutorError::query_timeout(100).into();
        assert_eq!(err.code_str(), "STRATUS_QUERY_TIMEOUT");

        let err: CliError = PlannerError::unknown_stage("$merge").into();
        assert_eq!(err.code_str(), "STRATUS_UNKNOWN_STAGE");
        assert!(err.to_string().starts_with("STRATUS_UNKNOWN_STAGE: "));
    }
}
