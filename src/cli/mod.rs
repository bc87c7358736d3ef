//! CLI module for Stratus
//!
//! Provides command-line interface for:
//! - run: Execute a pipeline over a JSON data directory
//! - explain: Validate a pipeline and print its plan

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{execute_pipeline, explain, explain_plan, load_config, run, run_command, run_query};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_pipeline, write_error, write_response};
