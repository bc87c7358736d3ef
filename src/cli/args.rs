//! CLI argument definitions using clap
//!
//! Commands:
//! - stratus run --data-dir <dir> --collection <name> --pipeline <file> [--config <file>]
//! - stratus explain --pipeline <file> [--config <file>] [--text]
//!
//! `--pipeline -` reads the pipeline from stdin.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stratus - analytical pipelines over weather observations
#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a pipeline over a collection and print the result
    Run {
        /// Directory holding one `<collection>.json` file per collection
        #[arg(long)]
        data_dir: PathBuf,

        /// Source collection
        #[arg(long)]
        collection: String,

        /// Pipeline file (JSON array of stages)
        #[arg(long)]
        pipeline: PathBuf,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate a pipeline and print its plan
    Explain {
        /// Pipeline file (JSON array of stages)
        #[arg(long)]
        pipeline: PathBuf,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the plan as text instead of JSON
        #[arg(long)]
        text: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
